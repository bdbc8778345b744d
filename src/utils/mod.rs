pub mod attachments;
pub mod logging;
#[cfg(test)]
pub mod test_utils;
pub mod time;
pub mod url;
