pub mod cleaner;
pub mod merger;

pub use cleaner::clean_page_content;
pub use merger::{html_to_text, merge_pages, PageResult};
