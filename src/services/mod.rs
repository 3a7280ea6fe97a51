pub mod auth;
pub mod cache;
pub mod message;
pub mod presence;
pub mod room;
pub mod token;
pub mod user;

pub use auth::{AuthService, AuthSession};
pub use cache::HotMessageCache;
pub use message::{HistoryQuery, MessageService};
pub use presence::PresenceRegistry;
pub use room::{CreateRoomInput, RoomService};
pub use token::{Claims, TokenPair, TokenService};
pub use user::UserService;
