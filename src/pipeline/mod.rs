pub mod notify;
pub mod recorder;
pub mod ringbuf;

pub use self::notify::{MotionEvent, MotionNotifier, NotificationEngine};
pub use self::recorder::MotionRecorder;
pub use self::ringbuf::PreEventBuffer;
