//! Bundle-level layer notifications.

use std::fmt::Debug;

use mlppp_core::{Layer, Phase};

/// Whatever owns the bundle and wants to hear about bundle-wide layer
/// changes, as opposed to one link's own negotiation.
pub trait LayerObserver: Debug + Send {
    /// A bundle-wide layer came up.
    fn layer_up(&mut self, layer: Layer);

    /// A bundle-wide layer went down.
    fn layer_down(&mut self, layer: Layer);

    /// The bundle changed phase.
    fn phase_changed(&mut self, _from: Phase, _to: Phase) {}
}
