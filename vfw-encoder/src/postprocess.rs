use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::bsf::rewrite_mpeg2_progressive;
use crate::frame::FrameRate;
use crate::queue::StageQueues;

/// In-place rewrite of an encoded packet.
pub type Fixup = fn(&mut [u8], FrameRate);

/// Matrox MPEG-2 drivers that mark progressive output as interlaced.
pub const MATROX_MPEG2_IDS: [&str; 4] = [
    "mvcVfwMpeg2-mmes",
    "mvcVfwMpeg2Alpha-m704",
    "mvcVfwMpeg2HD-m701",
    "mvcVfwMpeg2Alpha-m705",
];

/// Bitstream fixups keyed by codec id.
#[derive(Clone)]
pub struct FixupRegistry {
    fixups: HashMap<String, Vec<Fixup>>,
}

impl FixupRegistry {
    /// Registry with the built-in Matrox MPEG-2 rewrite.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for id in MATROX_MPEG2_IDS {
            registry.register(id, rewrite_mpeg2_progressive);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            fixups: HashMap::new(),
        }
    }

    /// Fixups run in registration order.
    pub fn register(&mut self, codec_id: impl Into<String>, fixup: Fixup) -> &mut Self {
        self.fixups.entry(codec_id.into()).or_default().push(fixup);
        self
    }

    pub fn lookup(&self, codec_id: &str) -> &[Fixup] {
        self.fixups.get(codec_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for FixupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PostProcessWorker {
    queues: Arc<StageQueues>,
    fixups: Vec<Fixup>,
    fps: FrameRate,
}

impl PostProcessWorker {
    pub fn new(queues: Arc<StageQueues>, fixups: &[Fixup], fps: FrameRate) -> Self {
        Self {
            queues,
            fixups: fixups.to_vec(),
            fps,
        }
    }

    pub fn run(self) {
        log::debug!("post-process worker started, {} fixups", self.fixups.len());
        while let Some(mut item) = self.queues.post.pop_blocking() {
            let started = Instant::now();
            for fixup in &self.fixups {
                fixup(&mut item.payload, self.fps);
            }
            log::trace!("post-process {} took {:?}", item, started.elapsed());

            if !self.queues.post.forward(&self.queues.output, item) {
                break;
            }
        }
        log::debug!("post-process worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytes::BytesMut;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::frame::FrameItem;

    fn invert(buf: &mut [u8], _fps: FrameRate) {
        buf.iter_mut().for_each(|b| *b = !*b);
    }

    fn bump(buf: &mut [u8], _fps: FrameRate) {
        if let Some(b) = buf.first_mut() {
            *b = b.wrapping_add(1);
        }
    }

    #[test]
    fn test_builtin_registry() {
        let registry = FixupRegistry::new();
        for id in MATROX_MPEG2_IDS {
            assert_eq!(registry.lookup(id).len(), 1, "{}", id);
        }
        assert!(registry.lookup("x264vfw-x264").is_empty());
        assert!(FixupRegistry::empty().lookup("mvcVfwMpeg2-mmes").is_empty());
    }

    #[test]
    fn test_register_keeps_order() {
        let mut registry = FixupRegistry::empty();
        registry.register("custom-abcd", invert).register("custom-abcd", bump);

        let mut buf = [0x00u8, 0x10];
        for fixup in registry.lookup("custom-abcd") {
            fixup(&mut buf, FrameRate::new(25, 1));
        }
        assert_eq!(buf, [0x00, 0xEF]);
    }

    #[test]
    fn test_worker_applies_fixups_and_forwards() {
        let cancel = CancellationToken::new();
        let queues = Arc::new(StageQueues::new(4, cancel.clone()));
        let worker =
            PostProcessWorker::new(queues.clone(), &[invert as Fixup], FrameRate::new(25, 1));
        let handle = thread::spawn(move || worker.run());

        queues
            .post
            .try_push(FrameItem::new(BytesMut::from(&[0x0Fu8][..]), 3, false))
            .unwrap();

        let mut delivered = None;
        for _ in 0..1000 {
            delivered = queues.output.pop_if_deeper_than(0);
            if delivered.is_some() {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(1));
        }
        let item = delivered.expect("item reached the final queue");
        assert_eq!(&item.payload[..], &[0xF0]);
        assert_eq!(item.timestamp, 3);
        assert_eq!(queues.post.len(), 0);

        cancel.cancel();
        queues.wake_all();
        handle.join().unwrap();
    }
}
