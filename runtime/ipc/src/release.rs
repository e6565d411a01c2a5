//! Ownership of transferred buffers
//!
//! A message that takes ownership of a [`BuffPtr`] records how to release it.
//! The list is swept exactly once: explicitly through
//! [`CleanupList::sweep`], or when the list (and the message owning it) is
//! dropped.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::object::BuffPtr;

/// Release function for a transferred buffer
pub type ReleaseFn = Box<dyn FnOnce(BuffPtr)>;

/// Ordered `(buffer, release)` registry attached to one message
#[derive(Default)]
pub struct CleanupList {
    entries: Vec<(BuffPtr, ReleaseFn)>,
}

impl CleanupList {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Take responsibility for releasing `buff`
    pub fn register<F>(&mut self, buff: BuffPtr, release: F)
    where
        F: FnOnce(BuffPtr) + 'static,
    {
        self.entries.push((buff, Box::new(release)));
    }

    /// Run every registered release in registration order and empty the list
    ///
    /// # Returns
    /// Number of buffers released. A second sweep releases nothing.
    pub fn sweep(&mut self) -> usize {
        let entries = core::mem::take(&mut self.entries);
        let count = entries.len();
        if count > 0 {
            log::debug!("releasing {} transferred buffer(s)", count);
        }
        for (buff, release) in entries {
            release(buff);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl core::fmt::Debug for CleanupList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(buff, _)| buff))
            .finish()
    }
}

impl Drop for CleanupList {
    fn drop(&mut self) {
        self.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::vec;

    #[test]
    fn test_sweep_runs_in_order_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut list = CleanupList::new();

        for addr in [0x1000, 0x2000] {
            let log = log.clone();
            list.register(BuffPtr::new(addr, 16), move |buff| {
                log.borrow_mut().push(buff.addr)
            });
        }
        assert_eq!(list.len(), 2);

        assert_eq!(list.sweep(), 2);
        assert!(list.is_empty());
        assert_eq!(*log.borrow(), vec![0x1000, 0x2000]);

        // Second sweep is a no-op
        assert_eq!(list.sweep(), 0);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_drop_sweeps() {
        let released = Rc::new(RefCell::new(0));
        {
            let mut list = CleanupList::new();
            let released = released.clone();
            list.register(BuffPtr::new(0x1000, 16), move |_| *released.borrow_mut() += 1);
        }
        assert_eq!(*released.borrow(), 1);
    }

    #[test]
    fn test_drop_after_sweep_does_not_double_release() {
        let released = Rc::new(RefCell::new(0));
        {
            let mut list = CleanupList::new();
            let counter = released.clone();
            list.register(BuffPtr::new(0x1000, 16), move |_| *counter.borrow_mut() += 1);
            list.sweep();
        }
        assert_eq!(*released.borrow(), 1);
    }
}
