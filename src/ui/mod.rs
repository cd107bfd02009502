mod pager;
mod spinner;
mod status;
mod table;

pub use pager::print_with_pager;

pub use spinner::with_spinner;

pub use status::{print_command_status, CommandStatus};

pub use table::{apply_column_padding, header, styled_table, truncate};
