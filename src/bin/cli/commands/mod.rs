pub mod complete;
pub mod compose;
pub mod progress;
pub mod reset;
pub mod unlock;
