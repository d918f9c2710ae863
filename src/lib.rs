pub mod commands;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod output;
pub mod protocol;
pub mod registers;
pub mod retry;
pub mod store;
pub mod stove;

#[cfg(test)]
mod testing;
