mod alert;
mod confirm_dialog;
mod key_result;

pub use alert::Alert;
pub use confirm_dialog::{ConfirmDialog, ConfirmEvent};
pub use key_result::KeyResult;
