//! The visualizer pipeline: extraction, mapping, animation, scheduling and
//! sizing, owned together by a [`VisualizerSession`].

pub mod animator;
pub mod extractor;
pub mod mapper;
pub mod scheduler;
pub mod session;
pub mod sizing;

pub use animator::{CellAnimator, CellState};
pub use extractor::{ExcitationExtractor, ExtractorOptions, ThresholdStat};
pub use mapper::{ExcitationEvent, HueMapping, MapperOptions};
pub use scheduler::{Clock, FrameScheduler, ManualClock, SchedulerKind, SystemClock, Task, Timers};
pub use session::VisualizerSession;
pub use sizing::{GridConfig, GridLayout, SizingController};
