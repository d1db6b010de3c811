pub mod conversation_task;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the main WebSocket handler and REST handlers to make them easily
// accessible to the binary that will build the web server router.
pub use rest::{
    analyze_writing_handler, progress_handler, reset_writing_handler,
    upload_writing_image_handler, writing_status_handler,
};
pub use ws_handler::ws_handler;
