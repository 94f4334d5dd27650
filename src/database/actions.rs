pub mod ingredients;
pub mod memberships;
pub mod recipes;
pub mod relations;
pub mod shopping_list;
pub mod subscriptions;
pub mod tags;
pub mod users;

pub use ingredients::*;
pub use memberships::*;
pub use recipes::*;
pub use relations::*;
pub use shopping_list::*;
pub use subscriptions::*;
pub use tags::*;
pub use users::*;
