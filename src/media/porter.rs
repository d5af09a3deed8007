//! RTP/RTCP port pair allocator.

use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Mutex;

/// Leases even ports from `[min, max)`, two at a time: the leased port
/// carries RTP and the odd port above it is implicitly reserved for RTCP.
/// Shared by every dialog of one client or server instance.
pub(crate) struct Porter {
    min: u16,
    max: u16,
    inner: Mutex<PorterInner>,
}

struct PorterInner {
    // rotating probe position, advances by 2 and wraps back to min
    next: u16,
    used: HashSet<u16>,
}

impl Porter {
    pub(crate) fn new(min: u16, max: u16) -> Result<Porter> {
        if min >= max || min % 2 != 0 {
            return Err(Error::Config(format!(
                "invalid rtp port range [{min}, {max})"
            )));
        }
        Ok(Porter {
            min,
            max,
            inner: Mutex::new(PorterInner {
                next: min,
                used: HashSet::new(),
            }),
        })
    }

    /// Returns a free even port, or [`Error::NoFreePorts`] when fewer than
    /// two ports of the range remain unleased.
    pub(crate) fn get(&self) -> Result<u16> {
        let mut inner = self.inner.lock().unwrap();
        let capacity = (self.max - self.min) as usize;
        if capacity - inner.used.len() * 2 < 2 {
            return Err(Error::NoFreePorts);
        }
        loop {
            let port = inner.next;
            inner.next += 2;
            if inner.next >= self.max {
                inner.next = self.min;
            }
            if inner.used.insert(port) {
                return Ok(port);
            }
        }
    }

    pub(crate) fn free(&self, port: u16) {
        self.inner.lock().unwrap().used.remove(&port);
    }
}
