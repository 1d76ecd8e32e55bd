pub mod chatbot;
pub mod docs;
