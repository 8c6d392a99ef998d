//! Lifecycle registry of live framebuffers.
//!
//! The backend owns one registry holding weak references to every live
//! framebuffer record. Membership mirrors the record's own linkage: records
//! unlink themselves on teardown, and re-remembering is idempotent. The
//! registry drives suspend/resume across display-device master switches and
//! the lookup of surface-backed framebuffers.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::framebuffer::{FramebufferRecord, ScanoutFramebuffer};
use crate::registration;

pub(crate) struct RegistryShared {
    entries: RefCell<Vec<Weak<FramebufferRecord>>>,
}

impl RegistryShared {
    /// Removes the entry for the record at `ptr`. Idempotent.
    pub(crate) fn forget_ptr(&self, ptr: *const FramebufferRecord) {
        self.entries
            .borrow_mut()
            .retain(|weak| !std::ptr::eq(weak.as_ptr(), ptr));
    }
}

/// The collection of live framebuffer records owned by a backend.
pub struct FramebufferRegistry {
    shared: Rc<RegistryShared>,
}

impl FramebufferRegistry {
    pub fn new() -> Self {
        FramebufferRegistry {
            shared: Rc::new(RegistryShared {
                entries: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Links the record into the registry. Re-linking an already remembered
    /// record is idempotent.
    pub(crate) fn remember(&self, record: &Rc<FramebufferRecord>) {
        self.shared.forget_ptr(Rc::as_ptr(record));
        record.link_registry(&self.shared);
        self.shared.entries.borrow_mut().push(Rc::downgrade(record));
    }

    /// Unlinks the record. Idempotent; the record can be remembered again
    /// afterwards.
    pub(crate) fn forget(&self, record: &Rc<FramebufferRecord>) {
        record.unlink_registry();
        self.shared.forget_ptr(Rc::as_ptr(record));
    }

    /// Live records, strongly held for the duration of an operation so
    /// iteration is not perturbed by concurrent drops.
    fn live(&self) -> Vec<Rc<FramebufferRecord>> {
        self.shared
            .entries
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Number of live framebuffers currently linked.
    pub fn live_count(&self) -> usize {
        self.shared
            .entries
            .borrow()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Removes the kernel registration of every live framebuffer not marked
    /// suspend-safe, so a new display-device master cannot observe stale
    /// framebuffers. The in-memory objects survive.
    pub fn suspend(&self) {
        let records = self.live();
        debug!(count = records.len(), "suspending framebuffer registrations");
        for record in records {
            if record.is_suspend_safe() {
                continue;
            }
            registration::deregister(record.device(), record.fb_id_cell());
        }
    }

    /// Re-registers every live framebuffer not marked suspend-safe.
    /// Individual failures are logged and left to heal through the normal
    /// repaint cycle.
    pub fn resume(&self) {
        let records = self.live();
        debug!(count = records.len(), "resuming framebuffer registrations");
        for record in records {
            if record.is_suspend_safe() || record.fb_id_cell().get() != 0 {
                continue;
            }
            match registration::register(
                record.device(),
                &record.request(),
                record.format(),
                record.modifier(),
                record.modifier_capable(),
            ) {
                Ok(fb_id) => record.fb_id_cell().set(fb_id),
                Err(e) => {
                    warn!(
                        format = record.format().name,
                        error = %e,
                        "framebuffer re-registration failed on resume"
                    );
                }
            }
        }
    }

    /// Finds the live framebuffer backed by the given driver surface, if
    /// any. Identity is the surface allocation, not its contents.
    pub fn find_surface_framebuffer(
        &self,
        surface: &Rc<dyn crate::driver::ScanoutSurface>,
    ) -> Option<ScanoutFramebuffer> {
        let target = Rc::as_ptr(surface) as *const ();
        self.live()
            .into_iter()
            .find(|record| record.surface_data_ptr() == Some(target))
            .map(ScanoutFramebuffer::from_record)
    }
}

impl Default for FramebufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}
