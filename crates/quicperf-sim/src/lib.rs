//! Network-condition emulation for the quicperf regression gate.
//!
//! A [`NetworkCondition`] describes delay, loss, duplication, reordering,
//! corruption and a bandwidth cap. The [`NetworkEmulator`] turns it into an
//! ordered list of `tc` directives and installs them through a
//! [`NetworkShaper`], reverting with a single qdisc delete.

pub mod condition;
pub mod emulator;
pub mod presets;
pub mod shaper;
pub mod test_util;
pub mod topology;

pub use condition::{GilbertElliott, NetworkCondition};
pub use emulator::{EmulatorError, NetworkEmulator};
pub use presets::{Preset, PRESETS};
pub use shaper::{DirectiveKind, NetworkShaper, TcDirective, TcShaper};
