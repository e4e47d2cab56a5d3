pub mod alert;
pub mod display;
pub mod session;
pub mod supervisor;

pub use alert::AlertActor;
pub use display::DisplayActor;
pub use session::{AlertGate, FrameSourceFactory, LiveSessionActor, SessionPolicy};
pub use supervisor::SupervisorActor;
