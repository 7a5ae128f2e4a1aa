// This is free and unencumbered software released into the public domain.

mod authorization;
pub use authorization::*;

mod config;
pub use config::*;

mod configurator;
pub use configurator::*;

mod delegate;
pub use delegate::*;

mod device;
pub use device::*;

mod dispatcher;
pub use dispatcher::*;

pub mod drivers {
    #[cfg(feature = "simulated")]
    pub mod simulated;

    #[cfg(all(feature = "avf", any(target_os = "ios", target_os = "macos")))]
    pub mod avf;
}

mod error;
pub use error::*;

mod frame;
pub use frame::*;

mod open;
pub use open::*;

mod output;
pub use output::*;

mod platform;
pub use platform::*;

mod queue;
pub use queue::*;

mod synchronized;
pub use synchronized::*;
