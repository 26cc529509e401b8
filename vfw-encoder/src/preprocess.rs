use std::sync::Arc;
use std::time::Instant;

use crate::queue::StageQueues;

/// Reverses the row order of `buf` in place.
///
/// VFW expects bottom-up DIBs, the caller hands in top-down frames. Bytes past
/// the last whole row are left alone.
pub fn flip_vertical(buf: &mut [u8], height: usize) {
    if height < 2 {
        return;
    }
    let line = buf.len() / height;
    if line == 0 {
        return;
    }
    for row in 0..height / 2 {
        let mirror = (height - row - 1) * line;
        let (head, tail) = buf.split_at_mut(mirror);
        head[row * line..(row + 1) * line].swap_with_slice(&mut tail[..line]);
    }
}

pub struct PreProcessWorker {
    queues: Arc<StageQueues>,
    height: usize,
}

impl PreProcessWorker {
    pub fn new(queues: Arc<StageQueues>, height: u32) -> Self {
        Self {
            queues,
            height: height as usize,
        }
    }

    pub fn run(self) {
        log::debug!("pre-process worker started");
        while let Some(mut item) = self.queues.pre.pop_blocking() {
            let started = Instant::now();
            flip_vertical(&mut item.payload, self.height);
            log::trace!("pre-process {} took {:?}", item, started.elapsed());

            if !self.queues.pre.forward(&self.queues.compress, item) {
                break;
            }
        }
        log::debug!("pre-process worker stopped");
    }
}
