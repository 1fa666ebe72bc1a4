//! Host surfaces

use tracing::trace;

use super::HostSurface;
use crate::errors::RenderResult;

/// Surface for renderers that run headless. Attaching only records state.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    attached: bool,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl HostSurface for HeadlessSurface {
    fn attach(&mut self) -> RenderResult<()> {
        self.attached = true;
        trace!("Headless surface attached");
        Ok(())
    }

    fn detach(&mut self) {
        if std::mem::take(&mut self.attached) {
            trace!("Headless surface detached");
        }
    }
}
