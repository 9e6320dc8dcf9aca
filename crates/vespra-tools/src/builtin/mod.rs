pub mod memory_forget;
pub mod memory_recall;
pub mod memory_save;
pub mod react;
pub mod reply;
pub mod web_search;

pub use memory_forget::MemoryForgetTool;
pub use memory_recall::MemoryRecallTool;
pub use memory_save::MemorySaveTool;
pub use react::ReactTool;
pub use reply::ReplyTool;
pub use web_search::WebSearchTool;
