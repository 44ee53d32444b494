#![deny(clippy::all)]

//! The state-tracker core of an OpenXR runtime: handle lifecycle, session
//! state, frame pacing, layer submission, input binding, and space math,
//! over abstract device and compositor backends.

pub mod compositor;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod handles;
pub mod input;
pub mod instance;
pub mod math;
pub mod paths;
pub mod relation_chain;
pub mod session;
pub mod spaces;
pub mod swapchain;
pub mod system;

mod util;

pub use error::{XrError, XrResult};
pub use handles::Handle;
pub use instance::{ApplicationInfo, ExtensionSet, Instance, InstanceCreateInfo};
pub use math::{Pose, Relation, XrDuration, XrTime};

use std::sync::LazyLock;
use std::time::Instant;

/// Nanoseconds on the process-wide monotonic clock all runtime timestamps
/// share. Always positive; the epoch is biased so time zero is never
/// handed out.
pub fn monotonic_time_ns() -> XrTime {
    static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);
    EPOCH.elapsed().as_nanos() as XrTime + 1_000_000
}

pub(crate) fn init_logging() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        // safety: worst case the log timestamps fall back to UTC
        unsafe {
            time::util::local_offset::set_soundness(time::util::local_offset::Soundness::Unsound)
        };

        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .parse_default_env()
            .is_test(cfg!(test))
            .format(|buf, record| {
                use std::io::Write;
                use time::macros::format_description;

                let style = buf.default_level_style(record.level());
                let now = time::OffsetDateTime::now_local()
                    .unwrap_or_else(|_| time::OffsetDateTime::now_utc());
                let now = now
                    .format(format_description!(
                        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                    ))
                    .unwrap();

                write!(buf, "[{now} {style}{:5}{style:#}", record.level())?;
                if let Some(path) = record.module_path() {
                    write!(buf, " {}", path)?;
                }
                writeln!(buf, " {:?}] {}", std::thread::current().id(), record.args())
            })
            .try_init()
            .ok();
    });
}
