//! Device identity and reset capabilities

/// Stable, unique identity derived from hardware at boot
pub trait IdentityProvider {
    /// Identifier string; must not change for the lifetime of the device
    fn device_id(&self) -> &str;

    /// Hardware class reported alongside the identifier (e.g. `"STM32F405"`)
    fn device_class(&self) -> &str;
}

/// Full device restart
///
/// On hardware this never returns. Test doubles record the call and return
/// so the caller's failure path stays observable.
pub trait Restart {
    fn restart(&mut self);
}
