pub mod image_update;
pub mod setting;
pub mod user;

pub use image_update::{ImageUpdate, ImageUpdateStore};
pub use setting::{Setting, SettingsCache};
pub use user::{NewUser, User};
