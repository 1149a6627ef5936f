mod command_input;
mod input;
mod key_result;
mod notice;
mod search_input;

pub use command_input::{CommandEvent, CommandInput};
pub use input::{InputResult, TextInput};
pub use key_result::KeyResult;
pub use notice::{Notice, NoticeLevel, Notices};
pub use search_input::SearchInput;
