//! Frame driver end-to-end test against a recording no-op backend.
//!
//! Exercises the full acquire → wait → record → submit → present state
//! machine for three frame-in-flight slots and two passes on different
//! submission queues, and checks the ordering guarantees the driver makes.

use std::sync::{Arc, Mutex};

use ash::vk;
use ash::vk::Handle;
use ember_render::backend::{FrameTarget, ImageAcquire, QueueSubmit, RenderBackend};
use ember_render::frame::QueueKind;
use ember_render::graph::{FrameDriver, FrameGraphBuilder};
use ember_rhi::RhiResult;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    WaitFence(u64),
    ResetFence(u64),
    Acquire { semaphore: u64, image: u32 },
    Begin(u64),
    End(u64),
    Submit {
        queue: QueueKind,
        command_buffer: u64,
        wait_semaphore: u64,
        signal_semaphore: u64,
        fence: u64,
    },
    Present { image: u32, wait_semaphore: u64 },
    WaitIdle,
}

/// No-op backend that mints handles from a counter and records every call.
struct NullBackend {
    slots: usize,
    next_handle: u64,
    next_image: u32,
    log: Arc<Mutex<Vec<Event>>>,
}

impl NullBackend {
    fn new(slots: usize) -> (Self, Arc<Mutex<Vec<Event>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                slots,
                next_handle: 1,
                next_image: 0,
                log: log.clone(),
            },
            log,
        )
    }

    fn mint(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn record(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }
}

impl RenderBackend for NullBackend {
    type Transients = ();

    fn frame_slot_count(&self) -> usize {
        self.slots
    }

    fn create_semaphore(&mut self) -> RhiResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.mint()))
    }

    fn create_fence(&mut self, _signaled: bool) -> RhiResult<vk::Fence> {
        Ok(vk::Fence::from_raw(self.mint()))
    }

    fn create_command_buffer(&mut self) -> RhiResult<vk::CommandBuffer> {
        Ok(vk::CommandBuffer::from_raw(self.mint()))
    }

    fn create_transients(&mut self) -> RhiResult<()> {
        Ok(())
    }

    fn destroy_semaphore(&mut self, _semaphore: vk::Semaphore) {}

    fn destroy_fence(&mut self, _fence: vk::Fence) {}

    fn wait_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
        self.record(Event::WaitFence(fence.as_raw()));
        Ok(())
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
        self.record(Event::ResetFence(fence.as_raw()));
        Ok(())
    }

    fn frame_target(&self, _image_index: u32) -> FrameTarget {
        FrameTarget::default()
    }

    fn acquire_image(&mut self, semaphore: vk::Semaphore) -> RhiResult<ImageAcquire> {
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.slots as u32;
        self.record(Event::Acquire {
            semaphore: semaphore.as_raw(),
            image,
        });
        Ok(ImageAcquire {
            image_index: image,
            needs_resize: false,
        })
    }

    fn begin_commands(&mut self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.record(Event::Begin(command_buffer.as_raw()));
        Ok(())
    }

    fn end_commands(&mut self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.record(Event::End(command_buffer.as_raw()));
        Ok(())
    }

    fn submit(&mut self, submit: &QueueSubmit) -> RhiResult<()> {
        self.record(Event::Submit {
            queue: submit.queue,
            command_buffer: submit.command_buffer.as_raw(),
            wait_semaphore: submit.wait_semaphore.as_raw(),
            signal_semaphore: submit.signal_semaphore.as_raw(),
            fence: submit.fence.as_raw(),
        });
        Ok(())
    }

    fn present(&mut self, image_index: u32, wait_semaphore: vk::Semaphore) -> RhiResult<bool> {
        self.record(Event::Present {
            image: image_index,
            wait_semaphore: wait_semaphore.as_raw(),
        });
        Ok(false)
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.record(Event::WaitIdle);
        Ok(())
    }
}

fn build_driver(
    slots: usize,
    pass_log: Arc<Mutex<Vec<(String, usize)>>>,
) -> (FrameDriver<NullBackend>, Arc<Mutex<Vec<Event>>>) {
    let (backend, log) = NullBackend::new(slots);

    let log_a = pass_log.clone();
    let log_b = pass_log;
    let graph = FrameGraphBuilder::new()
        .add_pass("shadow", QueueKind::EarlyGraphics, move |ctx| {
            log_a.lock().unwrap().push(("shadow".to_string(), ctx.slot));
            Ok(())
        })
        .add_pass("forward", QueueKind::Graphics, move |ctx| {
            log_b
                .lock()
                .unwrap()
                .push(("forward".to_string(), ctx.slot));
            Ok(())
        });

    let driver = FrameDriver::new(backend, graph).expect("driver creation");
    (driver, log)
}

#[test]
fn slots_cycle_in_order_over_ten_frames() {
    let pass_log = Arc::new(Mutex::new(Vec::new()));
    let (mut driver, _log) = build_driver(3, pass_log.clone());

    let mut observed_slots = Vec::new();
    for _ in 0..10 {
        observed_slots.push(driver.current_slot());
        let needs_resize = driver.render_frame().expect("frame");
        assert!(!needs_resize);
    }

    assert_eq!(observed_slots, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);

    // Both passes ran every frame, on the same slot.
    let passes = pass_log.lock().unwrap();
    assert_eq!(passes.len(), 20);
    for frame in passes.chunks(2) {
        assert_eq!(frame[0].0, "shadow");
        assert_eq!(frame[1].0, "forward");
        assert_eq!(frame[0].1, frame[1].1);
    }
}

#[test]
fn early_queue_ends_before_main_queue_submits() {
    let pass_log = Arc::new(Mutex::new(Vec::new()));
    let (mut driver, log) = build_driver(3, pass_log);

    for _ in 0..10 {
        driver.render_frame().expect("frame");
    }

    let events = log.lock().unwrap();
    let mut pending_end: Option<u64> = None;
    for event in events.iter() {
        match event {
            Event::End(cmd) => {
                // Remember the early queue's command buffer end; the first
                // End of each frame belongs to the early-graphics queue.
                if pending_end.is_none() {
                    pending_end = Some(*cmd);
                }
            }
            Event::Submit { queue, .. } => {
                assert!(
                    pending_end.is_some(),
                    "submission of {queue:?} before any command buffer ended"
                );
            }
            Event::Present { .. } => {
                pending_end = None;
            }
            _ => {}
        }
    }

    // Per frame: every End precedes every Submit, and the early queue is
    // submitted before the main queue.
    let mut frame_events: Vec<&Event> = Vec::new();
    for event in events.iter() {
        frame_events.push(event);
        if matches!(event, Event::WaitIdle) {
            let first_submit = frame_events
                .iter()
                .position(|e| matches!(e, Event::Submit { .. }))
                .expect("frame submits");
            let last_end = frame_events
                .iter()
                .rposition(|e| matches!(e, Event::End(_)))
                .expect("frame ends");
            assert!(last_end < first_submit, "a command buffer ended after a submission");

            let submits: Vec<&&Event> = frame_events
                .iter()
                .filter(|e| matches!(e, Event::Submit { .. }))
                .collect();
            assert_eq!(submits.len(), 2);
            if let (
                Event::Submit { queue: first, .. },
                Event::Submit { queue: second, .. },
            ) = (submits[0], submits[1])
            {
                assert_eq!(*first, QueueKind::EarlyGraphics);
                assert_eq!(*second, QueueKind::Graphics);
            }
            frame_events.clear();
        }
    }
}

#[test]
fn semaphores_chain_from_acquire_through_present() {
    let pass_log = Arc::new(Mutex::new(Vec::new()));
    let (mut driver, log) = build_driver(3, pass_log);

    driver.render_frame().expect("frame");

    let events = log.lock().unwrap();
    let acquire_semaphore = events
        .iter()
        .find_map(|e| match e {
            Event::Acquire { semaphore, .. } => Some(*semaphore),
            _ => None,
        })
        .expect("acquire");

    let submits: Vec<(u64, u64)> = events
        .iter()
        .filter_map(|e| match e {
            Event::Submit {
                wait_semaphore,
                signal_semaphore,
                ..
            } => Some((*wait_semaphore, *signal_semaphore)),
            _ => None,
        })
        .collect();
    assert_eq!(submits.len(), 2);

    // Queue 0 waits on the acquire semaphore; queue 1 waits on queue 0's
    // completion semaphore; present waits on queue 1's.
    assert_eq!(submits[0].0, acquire_semaphore);
    assert_eq!(submits[1].0, submits[0].1);

    let present_wait = events
        .iter()
        .find_map(|e| match e {
            Event::Present { wait_semaphore, .. } => Some(*wait_semaphore),
            _ => None,
        })
        .expect("present");
    assert_eq!(present_wait, submits[1].1);
}

#[test]
fn slot_fences_are_waited_before_rerecording() {
    let pass_log = Arc::new(Mutex::new(Vec::new()));
    let (mut driver, log) = build_driver(3, pass_log);

    for _ in 0..10 {
        driver.render_frame().expect("frame");
    }

    let events = log.lock().unwrap();

    // Map each command buffer to the fences of its slot via the submits.
    // Within every frame: all fence waits happen before the first Begin.
    let mut frame_events: Vec<&Event> = Vec::new();
    for event in events.iter() {
        frame_events.push(event);
        if matches!(event, Event::WaitIdle) {
            let first_begin = frame_events
                .iter()
                .position(|e| matches!(e, Event::Begin(_)))
                .expect("frame begins");
            let last_wait = frame_events
                .iter()
                .rposition(|e| matches!(e, Event::WaitFence(_)))
                .expect("frame waits fences");
            assert!(
                last_wait < first_begin,
                "a command buffer was re-recorded before its slot's fence wait"
            );
            frame_events.clear();
        }
    }

    // Every submitted fence is eventually waited on in the slot's next
    // cycle: fences submitted in frame N appear as WaitFence in frame N+3.
    let submitted: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            Event::Submit { fence, .. } => Some(*fence),
            _ => None,
        })
        .collect();
    let waited: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            Event::WaitFence(fence) => Some(*fence),
            _ => None,
        })
        .collect();
    // 10 frames, 2 queues each.
    assert_eq!(submitted.len(), 20);
    // Frames 4..10 re-wait the fences of frames 1..7 (same slot, 3 apart).
    for frame in 3..10 {
        let wait_pair = &waited[frame * 2..frame * 2 + 2];
        let submit_pair = &submitted[(frame - 3) * 2..(frame - 3) * 2 + 2];
        assert_eq!(wait_pair, submit_pair);
    }
}

#[test]
fn acquire_resize_skips_the_frame() {
    struct ResizingBackend {
        inner: NullBackend,
    }

    impl RenderBackend for ResizingBackend {
        type Transients = ();

        fn frame_slot_count(&self) -> usize {
            self.inner.frame_slot_count()
        }
        fn create_semaphore(&mut self) -> RhiResult<vk::Semaphore> {
            self.inner.create_semaphore()
        }
        fn create_fence(&mut self, signaled: bool) -> RhiResult<vk::Fence> {
            self.inner.create_fence(signaled)
        }
        fn create_command_buffer(&mut self) -> RhiResult<vk::CommandBuffer> {
            self.inner.create_command_buffer()
        }
        fn create_transients(&mut self) -> RhiResult<()> {
            Ok(())
        }
        fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
            self.inner.destroy_semaphore(semaphore);
        }
        fn destroy_fence(&mut self, fence: vk::Fence) {
            self.inner.destroy_fence(fence);
        }
        fn wait_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
            self.inner.wait_fence(fence)
        }
        fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
            self.inner.reset_fence(fence)
        }
        fn frame_target(&self, image_index: u32) -> FrameTarget {
            self.inner.frame_target(image_index)
        }
        fn acquire_image(&mut self, _semaphore: vk::Semaphore) -> RhiResult<ImageAcquire> {
            Ok(ImageAcquire {
                image_index: 0,
                needs_resize: true,
            })
        }
        fn begin_commands(&mut self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
            self.inner.begin_commands(command_buffer)
        }
        fn end_commands(&mut self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
            self.inner.end_commands(command_buffer)
        }
        fn submit(&mut self, submit: &QueueSubmit) -> RhiResult<()> {
            self.inner.submit(submit)
        }
        fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> RhiResult<bool> {
            self.inner.present(image_index, wait)
        }
        fn wait_idle(&mut self) -> RhiResult<()> {
            self.inner.wait_idle()
        }
    }

    let (inner, log) = NullBackend::new(2);
    let graph = FrameGraphBuilder::new().add_pass("forward", QueueKind::Graphics, |_| Ok(()));
    let mut driver = FrameDriver::new(ResizingBackend { inner }, graph).expect("driver");

    let needs_resize = driver.render_frame().expect("frame");
    assert!(needs_resize);

    // Nothing was recorded, submitted, or presented.
    let events = log.lock().unwrap();
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::Begin(_) | Event::Submit { .. } | Event::Present { .. }
    )));
}
