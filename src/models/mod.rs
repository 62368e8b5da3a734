mod ad;
mod click;

pub use ad::{Ad, AdListResponse};
pub use click::{ClickEvent, StoredEventRecord};
