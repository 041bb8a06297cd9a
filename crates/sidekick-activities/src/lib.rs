pub mod append_message_activity;
pub mod context;
pub mod flow_event;
pub mod image_activity;
pub mod stream_activity;

pub use append_message_activity::append_message;
pub use context::ActivityContext;
pub use flow_event::{FlowEvent, FlowEventStreamer};
pub use image_activity::{build_kv_image_url, read_image};
pub use stream_activity::{run as run_stream_activity, StreamActivityInput};
