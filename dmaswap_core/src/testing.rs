// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory stand-ins for the compositor, the driver and the kernel.

use core::fmt;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rustix::io::Errno;

use crate::channel::{
    BufferId, CallbackId, ChannelCapabilities, DamageRect, DmabufDesc, PresentationId,
    SurfaceChannel, SurfaceEvent, TimelineId,
};
use crate::config::PresentConfig;
use crate::display::{DisplayDesc, DisplayInstance, DisplayServices, SurfaceKey};
use crate::error::{ChannelError, DriverError};
use crate::features::FeatureCache;
use crate::feedback::{DeviceId, FeedbackEvent, NegotiatedFeedback};
use crate::format::{FormatEntry, FormatList, Fourcc, Modifier};
use crate::platform::{
    BufferAllocator, BufferObject, ColorBuffer, ConfigId, DmabufSync, ExportedBuffer, GpuDriver,
    RenderSurfaceId, SyncobjDevice, SyncobjHandle, TimelineWaitMode, UpdateCallback,
    WaitDeadline,
};
use crate::surface::{NativeWindow, WindowListener};
use crate::time::{Clock, HostTime};

pub(crate) const MOD_A: Modifier = Modifier(0x0200_0000_0000_0001);
pub(crate) const MOD_B: Modifier = Modifier(0x0200_0000_0000_0002);
pub(crate) const RENDER_DEVICE: DeviceId = DeviceId(1);

static DRIVER_MODIFIERS: [Modifier; 2] = [MOD_A, MOD_B];

/// Modifiers the fake driver renders with, in preference order.
pub(crate) fn driver_modifiers() -> &'static [Modifier] {
    &DRIVER_MODIFIERS
}

fn dev_null() -> OwnedFd {
    OwnedFd::from(std::fs::File::open("/dev/null").unwrap())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State accumulated between two commits.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Commit {
    pub(crate) buffer: Option<BufferId>,
    pub(crate) damage: Vec<DamageRect>,
    pub(crate) full_damage: bool,
    pub(crate) acquire_point: Option<u64>,
    pub(crate) release_point: Option<u64>,
    pub(crate) fifo_barrier: bool,
    pub(crate) fifo_waits: usize,
    pub(crate) commit_timestamp: Option<HostTime>,
    pub(crate) presentation_feedbacks: usize,
    pub(crate) frame_callback: bool,
}

type BlockHook = Box<dyn FnOnce(&mut FakeState) + Send>;

/// What the fake compositor has seen, and what it will do next.
#[derive(Default)]
pub(crate) struct FakeState {
    pub(crate) caps: ChannelCapabilities,
    pub(crate) events: VecDeque<SurfaceEvent>,
    pub(crate) buffers: HashMap<BufferId, DmabufDesc>,
    pub(crate) reject_buffers: bool,
    pub(crate) timelines: HashSet<TimelineId>,
    pub(crate) fail_timeline_import: bool,
    pub(crate) explicit_sync_enabled: bool,
    pub(crate) release_on_block: VecDeque<BufferId>,
    pub(crate) blocking_dispatches: usize,
    pub(crate) commits: Vec<Commit>,
    pub(crate) outstanding_callbacks: Vec<CallbackId>,
    pub(crate) outstanding_presentations: Vec<PresentationId>,
    pub(crate) destroyed_callbacks: Vec<CallbackId>,
    pub(crate) destroyed_presentations: Vec<PresentationId>,
    pub(crate) feedback_on_roundtrip: Vec<FeedbackEvent>,
    pub(crate) subscribed: bool,
    pub(crate) shut_down: bool,
    pending: Commit,
    next_id: u64,
    on_block: Option<BlockHook>,
}

impl fmt::Debug for FakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeState")
            .field("buffers", &self.buffers.len())
            .field("commits", &self.commits.len())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Queues a release notice.
    pub(crate) fn push_release(&mut self, id: BufferId) {
        self.events.push_back(SurfaceEvent::BufferReleased(id));
    }

    /// Queues a callback completion.
    pub(crate) fn push_callback_done(&mut self, id: CallbackId) {
        self.events.push_back(SurfaceEvent::CallbackDone(id));
    }

    /// Completes every outstanding callback and presents every outstanding
    /// frame.
    pub(crate) fn complete_all(&mut self) {
        for id in core::mem::take(&mut self.outstanding_callbacks) {
            self.push_callback_done(id);
        }
        for id in core::mem::take(&mut self.outstanding_presentations) {
            self.events.push_back(SurfaceEvent::Presented {
                id,
                timestamp: Clock::Monotonic.now(),
                refresh_ns: 16_666_666,
            });
        }
    }

    pub(crate) fn has_outstanding_callbacks(&self) -> bool {
        !self.outstanding_callbacks.is_empty()
    }

    /// Runs `hook` the next time the client blocks on the queue.
    pub(crate) fn on_block(&mut self, hook: impl FnOnce(&mut Self) + Send + 'static) {
        self.on_block = Some(Box::new(hook));
    }
}

/// Shared view of a [`FakeChannel`]'s state.
#[derive(Clone, Debug)]
pub(crate) struct FakeLog(Arc<Mutex<FakeState>>);

impl FakeLog {
    pub(crate) fn state(&self) -> MutexGuard<'_, FakeState> {
        lock(&self.0)
    }
}

/// A compositor that answers synchronously and records every request.
#[derive(Debug)]
pub(crate) struct FakeChannel {
    log: FakeLog,
}

impl FakeChannel {
    pub(crate) fn new() -> (Self, FakeLog) {
        let log = FakeLog(Arc::new(Mutex::new(FakeState::default())));
        (Self { log: log.clone() }, log)
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.log.state()
    }
}

impl SurfaceChannel for FakeChannel {
    fn capabilities(&self) -> ChannelCapabilities {
        self.state().caps
    }

    fn presentation_clock(&self) -> Clock {
        Clock::Monotonic
    }

    fn dispatch_pending(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn blocking_dispatch(&mut self) -> Result<(), ChannelError> {
        let mut state = self.state();
        state.blocking_dispatches += 1;
        if let Some(hook) = state.on_block.take() {
            hook(&mut state);
        }
        while let Some(id) = state.release_on_block.pop_front() {
            state.push_release(id);
        }
        if state.events.is_empty() {
            return Err(ChannelError::Connection(
                "blocking dispatch with nothing to deliver".into(),
            ));
        }
        Ok(())
    }

    fn roundtrip(&mut self) -> Result<(), ChannelError> {
        let mut state = self.state();
        for event in core::mem::take(&mut state.feedback_on_roundtrip) {
            state.events.push_back(SurfaceEvent::Feedback(event));
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn next_event(&mut self) -> Option<SurfaceEvent> {
        self.state().events.pop_front()
    }

    fn share_dmabuf(
        &mut self,
        _dmabuf: BorrowedFd<'_>,
        desc: &DmabufDesc,
    ) -> Result<BufferId, ChannelError> {
        let mut state = self.state();
        if state.reject_buffers {
            return Err(ChannelError::BufferRejected);
        }
        let id = BufferId(state.next_id());
        state.buffers.insert(id, *desc);
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.state().buffers.remove(&buffer);
    }

    fn enable_explicit_sync(&mut self) -> Result<(), ChannelError> {
        self.state().explicit_sync_enabled = true;
        Ok(())
    }

    fn import_timeline(&mut self, _syncobj: BorrowedFd<'_>) -> Result<TimelineId, ChannelError> {
        let mut state = self.state();
        if state.fail_timeline_import {
            return Err(ChannelError::Unsupported("wp_linux_drm_syncobj_manager_v1"));
        }
        let id = TimelineId(state.next_id());
        state.timelines.insert(id);
        Ok(id)
    }

    fn destroy_timeline(&mut self, timeline: TimelineId) {
        self.state().timelines.remove(&timeline);
    }

    fn set_acquire_point(&mut self, _timeline: TimelineId, point: u64) {
        self.state().pending.acquire_point = Some(point);
    }

    fn set_release_point(&mut self, _timeline: TimelineId, point: u64) {
        self.state().pending.release_point = Some(point);
    }

    fn damage_buffer(&mut self, rect: DamageRect) {
        self.state().pending.damage.push(rect);
    }

    fn damage_all(&mut self) {
        self.state().pending.full_damage = true;
    }

    fn attach(&mut self, buffer: BufferId) {
        self.state().pending.buffer = Some(buffer);
    }

    fn commit(&mut self) {
        let mut state = self.state();
        let commit = core::mem::take(&mut state.pending);
        state.commits.push(commit);
    }

    fn request_frame(&mut self) -> CallbackId {
        let mut state = self.state();
        let id = CallbackId(state.next_id());
        state.outstanding_callbacks.push(id);
        state.pending.frame_callback = true;
        id
    }

    fn request_sync(&mut self) -> CallbackId {
        let mut state = self.state();
        let id = CallbackId(state.next_id());
        state.outstanding_callbacks.push(id);
        id
    }

    fn destroy_callback(&mut self, callback: CallbackId) {
        let mut state = self.state();
        state.outstanding_callbacks.retain(|id| *id != callback);
        state.destroyed_callbacks.push(callback);
    }

    fn set_fifo_barrier(&mut self) {
        self.state().pending.fifo_barrier = true;
    }

    fn wait_fifo_barrier(&mut self) {
        self.state().pending.fifo_waits += 1;
    }

    fn set_commit_timestamp(&mut self, target: HostTime) {
        self.state().pending.commit_timestamp = Some(target);
    }

    fn request_presentation_feedback(&mut self) -> PresentationId {
        let mut state = self.state();
        let id = PresentationId(state.next_id());
        state.outstanding_presentations.push(id);
        state.pending.presentation_feedbacks += 1;
        id
    }

    fn destroy_presentation_feedback(&mut self, feedback: PresentationId) {
        let mut state = self.state();
        state.outstanding_presentations.retain(|id| *id != feedback);
        state.destroyed_presentations.push(feedback);
    }

    fn subscribe_surface_feedback(&mut self) -> Result<(), ChannelError> {
        self.state().subscribed = true;
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut state = self.state();
        state.subscribed = false;
        state.shut_down = true;
    }
}

#[derive(Debug, Default)]
struct SyncobjState {
    next_handle: u32,
    next_token: u64,
    /// Point → fence token per object. Point zero is the binary payload;
    /// token zero is a CPU signal.
    objects: HashMap<u32, BTreeMap<u64, u64>>,
    fds: HashMap<RawFd, u64>,
    fail_import: bool,
    import_attempts: usize,
}

impl SyncobjState {
    fn register(&mut self, token: u64) -> OwnedFd {
        let fd = dev_null();
        self.fds.insert(fd.as_raw_fd(), token);
        fd
    }

    fn lookup(&self, handle: SyncobjHandle, point: u64) -> Option<u64> {
        let points = self.objects.get(&handle.0)?;
        if point == 0 {
            points.get(&0).copied()
        } else {
            points.range(point..).next().map(|(_, token)| *token)
        }
    }
}

/// A sync-object device where every fence has already signalled.
#[derive(Debug, Default)]
pub(crate) struct FakeSyncobj {
    state: Mutex<SyncobjState>,
}

/// Creates a sync file carrying a fresh fence token.
pub(crate) fn fence_fd(syncobj: &FakeSyncobj) -> (OwnedFd, u64) {
    let mut state = lock(&syncobj.state);
    state.next_token += 1;
    let token = state.next_token;
    (state.register(token), token)
}

impl FakeSyncobj {
    pub(crate) fn live_objects(&self) -> usize {
        lock(&self.state).objects.len()
    }

    /// The fence token a sync file carries.
    pub(crate) fn fence_of(&self, fd: &OwnedFd) -> Option<u64> {
        lock(&self.state).fds.get(&fd.as_raw_fd()).copied()
    }

    pub(crate) fn fail_import_sync_file(&self) {
        lock(&self.state).fail_import = true;
    }

    pub(crate) fn import_attempts(&self) -> usize {
        lock(&self.state).import_attempts
    }

    pub(crate) fn is_signalled(&self, handle: SyncobjHandle, point: u64) -> bool {
        lock(&self.state).lookup(handle, point).is_some()
    }

    /// Signals a point as the compositor would on release.
    pub(crate) fn signal(&self, handle: SyncobjHandle, point: u64) {
        if let Some(points) = lock(&self.state).objects.get_mut(&handle.0) {
            points.insert(point, 0);
        }
    }
}

impl SyncobjDevice for FakeSyncobj {
    fn create(&self) -> Result<SyncobjHandle, Errno> {
        let mut state = lock(&self.state);
        state.next_handle += 1;
        let handle = state.next_handle;
        state.objects.insert(handle, BTreeMap::new());
        Ok(SyncobjHandle(handle))
    }

    fn destroy(&self, handle: SyncobjHandle) {
        lock(&self.state).objects.remove(&handle.0);
    }

    fn handle_to_fd(&self, handle: SyncobjHandle) -> Result<OwnedFd, Errno> {
        let mut state = lock(&self.state);
        if !state.objects.contains_key(&handle.0) {
            return Err(Errno::NOENT);
        }
        Ok(state.register(0))
    }

    fn import_sync_file(
        &self,
        handle: SyncobjHandle,
        sync_file: BorrowedFd<'_>,
    ) -> Result<(), Errno> {
        let mut state = lock(&self.state);
        state.import_attempts += 1;
        if state.fail_import {
            return Err(Errno::OPNOTSUPP);
        }
        let token = state.fds.get(&sync_file.as_raw_fd()).copied().unwrap_or(0);
        let points = state.objects.get_mut(&handle.0).ok_or(Errno::NOENT)?;
        points.clear();
        points.insert(0, token);
        Ok(())
    }

    fn export_sync_file(&self, handle: SyncobjHandle) -> Result<OwnedFd, Errno> {
        let mut state = lock(&self.state);
        let token = state.lookup(handle, 0).ok_or(Errno::INVAL)?;
        Ok(state.register(token))
    }

    fn transfer(
        &self,
        dst: SyncobjHandle,
        dst_point: u64,
        src: SyncobjHandle,
        src_point: u64,
    ) -> Result<(), Errno> {
        let mut state = lock(&self.state);
        let token = state.lookup(src, src_point).ok_or(Errno::INVAL)?;
        let points = state.objects.get_mut(&dst.0).ok_or(Errno::NOENT)?;
        if dst_point == 0 {
            points.clear();
        }
        points.insert(dst_point, token);
        Ok(())
    }

    fn timeline_wait(
        &self,
        handles: &[SyncobjHandle],
        points: &[u64],
        deadline: WaitDeadline,
        _mode: TimelineWaitMode,
    ) -> Result<usize, Errno> {
        let state = lock(&self.state);
        if let Some(index) = handles
            .iter()
            .zip(points)
            .position(|(handle, point)| state.lookup(*handle, *point).is_some())
        {
            return Ok(index);
        }
        match deadline {
            // Nothing else will ever signal; fail instead of hanging.
            WaitDeadline::Forever => Err(Errno::DEADLK),
            WaitDeadline::Poll | WaitDeadline::At(_) => Err(Errno::TIME),
        }
    }

    fn timeline_signal(&self, handle: SyncobjHandle, point: u64) -> Result<(), Errno> {
        let mut state = lock(&self.state);
        let points = state.objects.get_mut(&handle.0).ok_or(Errno::NOENT)?;
        points.insert(point, 0);
        Ok(())
    }
}

#[derive(Default)]
struct DriverState {
    next_id: u64,
    live: HashSet<u64>,
    native_fence: bool,
    fence_waits: usize,
    finishes: usize,
    copies: usize,
    set_color_buffer_calls: usize,
    fail_set_color_buffers: bool,
    render_surfaces: HashMap<u64, Arc<dyn Fn() + Send + Sync>>,
}

impl DriverState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A driver whose rendering completes instantly.
pub(crate) struct FakeDriver {
    syncobj: Arc<FakeSyncobj>,
    state: Mutex<DriverState>,
}

impl fmt::Debug for FakeDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("FakeDriver")
            .field("live", &state.live.len())
            .field("render_surfaces", &state.render_surfaces.len())
            .finish_non_exhaustive()
    }
}

impl FakeDriver {
    fn new(syncobj: Arc<FakeSyncobj>) -> Self {
        Self {
            syncobj,
            state: Mutex::new(DriverState {
                native_fence: true,
                ..DriverState::default()
            }),
        }
    }

    pub(crate) fn live_buffers(&self) -> usize {
        lock(&self.state).live.len()
    }

    pub(crate) fn fence_waits(&self) -> usize {
        lock(&self.state).fence_waits
    }

    pub(crate) fn finishes(&self) -> usize {
        lock(&self.state).finishes
    }

    pub(crate) fn copies(&self) -> usize {
        lock(&self.state).copies
    }

    pub(crate) fn set_color_buffer_calls(&self) -> usize {
        lock(&self.state).set_color_buffer_calls
    }

    pub(crate) fn fail_set_color_buffers(&self, fail: bool) {
        lock(&self.state).fail_set_color_buffers = fail;
    }

    pub(crate) fn live_render_surfaces(&self) -> usize {
        lock(&self.state).render_surfaces.len()
    }

    /// Runs every update callback, as the driver does before rendering.
    pub(crate) fn fire_update(&self) {
        let callbacks: Vec<_> = lock(&self.state).render_surfaces.values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

impl GpuDriver for FakeDriver {
    fn alloc_color_buffer(
        &self,
        _width: u32,
        _height: u32,
        _fourcc: Fourcc,
        _modifier: Modifier,
        _linear: bool,
    ) -> Result<ColorBuffer, DriverError> {
        let mut state = lock(&self.state);
        let id = state.next_id();
        state.live.insert(id);
        Ok(ColorBuffer(id))
    }

    fn import_color_buffer(
        &self,
        _plane: &ExportedBuffer,
        _width: u32,
        _height: u32,
        _fourcc: Fourcc,
        _modifier: Modifier,
    ) -> Result<ColorBuffer, DriverError> {
        let mut state = lock(&self.state);
        let id = state.next_id();
        state.live.insert(id);
        Ok(ColorBuffer(id))
    }

    fn export_color_buffer(&self, buffer: ColorBuffer) -> Result<ExportedBuffer, DriverError> {
        if !lock(&self.state).live.contains(&buffer.0) {
            return Err(DriverError::new("export_color_buffer"));
        }
        Ok(ExportedBuffer {
            fd: dev_null(),
            stride: 256,
            offset: 0,
        })
    }

    fn free_color_buffer(&self, buffer: ColorBuffer) {
        lock(&self.state).live.remove(&buffer.0);
    }

    fn copy_color_buffer(&self, _src: ColorBuffer, _dst: ColorBuffer) -> Result<(), DriverError> {
        lock(&self.state).copies += 1;
        Ok(())
    }

    fn supports_native_fence(&self) -> bool {
        lock(&self.state).native_fence
    }

    fn create_render_fence(&self) -> Result<OwnedFd, DriverError> {
        Ok(fence_fd(&self.syncobj).0)
    }

    fn wait_fence(&self, _fence: OwnedFd) -> Result<(), DriverError> {
        lock(&self.state).fence_waits += 1;
        Ok(())
    }

    fn finish(&self) {
        lock(&self.state).finishes += 1;
    }

    fn create_render_surface(
        &self,
        _config: ConfigId,
        _back: ColorBuffer,
        on_update: UpdateCallback,
    ) -> Result<RenderSurfaceId, DriverError> {
        let mut state = lock(&self.state);
        let id = state.next_id();
        state.render_surfaces.insert(id, Arc::from(on_update));
        Ok(RenderSurfaceId(id))
    }

    fn set_color_buffers(
        &self,
        _surface: RenderSurfaceId,
        _back: ColorBuffer,
    ) -> Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.set_color_buffer_calls += 1;
        if state.fail_set_color_buffers {
            return Err(DriverError::new("set_color_buffers"));
        }
        Ok(())
    }

    fn destroy_render_surface(&self, surface: RenderSurfaceId) {
        lock(&self.state).render_surfaces.remove(&surface.0);
    }
}

#[derive(Debug, Default)]
struct AllocatorState {
    last_scanout: bool,
    last_modifiers: Vec<Modifier>,
    sizes: Vec<(u32, u32)>,
}

/// An allocator that always picks the first offered modifier.
#[derive(Debug, Default)]
pub(crate) struct FakeAllocator {
    state: Mutex<AllocatorState>,
}

impl FakeAllocator {
    pub(crate) fn last_scanout(&self) -> bool {
        lock(&self.state).last_scanout
    }

    pub(crate) fn last_modifiers(&self) -> Vec<Modifier> {
        lock(&self.state).last_modifiers.clone()
    }

    pub(crate) fn sizes(&self) -> Vec<(u32, u32)> {
        lock(&self.state).sizes.clone()
    }
}

impl BufferAllocator for FakeAllocator {
    fn create_buffer(
        &self,
        width: u32,
        height: u32,
        _fourcc: Fourcc,
        modifiers: &[Modifier],
        scanout: bool,
    ) -> Result<BufferObject, Errno> {
        let mut state = lock(&self.state);
        state.last_scanout = scanout;
        state.last_modifiers = modifiers.to_vec();
        state.sizes.push((width, height));
        Ok(BufferObject {
            plane: ExportedBuffer {
                fd: dev_null(),
                stride: width * 4,
                offset: 0,
            },
            modifier: modifiers.first().copied().unwrap_or(Modifier::LINEAR),
        })
    }
}

#[derive(Debug, Default)]
struct DmabufSyncState {
    imports: usize,
    exports: usize,
    fail: Option<Errno>,
}

/// Implicit-fence ioctls that always succeed unless told otherwise.
#[derive(Debug, Default)]
pub(crate) struct FakeDmabufSync {
    state: Mutex<DmabufSyncState>,
}

impl FakeDmabufSync {
    pub(crate) fn imports(&self) -> usize {
        lock(&self.state).imports
    }

    pub(crate) fn exports(&self) -> usize {
        lock(&self.state).exports
    }

    pub(crate) fn fail_with(&self, errno: Errno) {
        lock(&self.state).fail = Some(errno);
    }
}

impl DmabufSync for FakeDmabufSync {
    fn import_sync_file(
        &self,
        _dmabuf: BorrowedFd<'_>,
        _sync_file: BorrowedFd<'_>,
    ) -> Result<(), Errno> {
        let mut state = lock(&self.state);
        state.imports += 1;
        state.fail.map_or(Ok(()), Err)
    }

    fn export_sync_file(&self, _dmabuf: BorrowedFd<'_>) -> Result<OwnedFd, Errno> {
        let mut state = lock(&self.state);
        state.exports += 1;
        match state.fail {
            Some(errno) => Err(errno),
            None => Ok(dev_null()),
        }
    }
}

#[derive(Default)]
struct WindowState {
    size: (i32, i32),
    attached: (u32, u32),
    listener: Option<Weak<dyn WindowListener>>,
}

/// A native window driven by the test.
pub(crate) struct FakeWindow {
    key: Option<SurfaceKey>,
    state: Mutex<WindowState>,
}

impl fmt::Debug for FakeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("FakeWindow")
            .field("key", &self.key)
            .field("size", &state.size)
            .field("attached", &state.attached)
            .finish_non_exhaustive()
    }
}

impl FakeWindow {
    pub(crate) fn new(key: SurfaceKey, width: i32, height: i32) -> Self {
        Self {
            key: Some(key),
            state: Mutex::new(WindowState {
                size: (width, height),
                ..WindowState::default()
            }),
        }
    }

    /// A handle that does not wrap a compositor surface.
    pub(crate) fn invalid() -> Self {
        Self {
            key: None,
            state: Mutex::new(WindowState::default()),
        }
    }

    fn listener(&self) -> Option<Arc<dyn WindowListener>> {
        lock(&self.state).listener.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn resize(&self, width: i32, height: i32) {
        lock(&self.state).size = (width, height);
        if let Some(listener) = self.listener() {
            listener.resized(width, height);
        }
    }

    pub(crate) fn destroy(&self) {
        if let Some(listener) = self.listener() {
            listener.destroyed();
        }
    }

    pub(crate) fn attached_size(&self) -> (u32, u32) {
        lock(&self.state).attached
    }

    pub(crate) fn has_listener(&self) -> bool {
        lock(&self.state).listener.is_some()
    }
}

impl NativeWindow for FakeWindow {
    fn surface_key(&self) -> Option<SurfaceKey> {
        self.key
    }

    fn size(&self) -> (i32, i32) {
        lock(&self.state).size
    }

    fn set_attached_size(&self, width: u32, height: u32) {
        lock(&self.state).attached = (width, height);
    }

    fn set_listener(&self, listener: Option<Weak<dyn WindowListener>>) {
        lock(&self.state).listener = listener;
    }
}

/// Builds a [`DisplayInstance`] over fakes and keeps handles to them.
#[derive(Debug)]
pub(crate) struct TestDisplay {
    pub(crate) driver: Arc<FakeDriver>,
    pub(crate) allocator: Arc<FakeAllocator>,
    pub(crate) syncobj: Arc<FakeSyncobj>,
    pub(crate) dmabuf_sync: Arc<FakeDmabufSync>,
    pub(crate) features: Arc<FeatureCache>,
    use_syncobj: bool,
    implicit_sync: bool,
    force_prime: bool,
    main_device: DeviceId,
    compositor: Arc<FormatList>,
}

impl TestDisplay {
    pub(crate) fn new() -> Self {
        let syncobj = Arc::new(FakeSyncobj::default());
        let shared = [MOD_B, Modifier::LINEAR];
        Self {
            driver: Arc::new(FakeDriver::new(Arc::clone(&syncobj))),
            allocator: Arc::new(FakeAllocator::default()),
            syncobj,
            dmabuf_sync: Arc::new(FakeDmabufSync::default()),
            features: Arc::new(FeatureCache::new()),
            use_syncobj: true,
            implicit_sync: true,
            force_prime: false,
            main_device: RENDER_DEVICE,
            compositor: FormatList::new([
                FormatEntry::new(Fourcc::XRGB8888, shared),
                FormatEntry::new(Fourcc::ARGB8888, shared),
            ])
            .shared(),
        }
    }

    pub(crate) fn without_syncobj(mut self) -> Self {
        self.use_syncobj = false;
        self
    }

    pub(crate) fn implicit_sync(mut self, enabled: bool) -> Self {
        self.implicit_sync = enabled;
        self
    }

    pub(crate) fn native_fence(self, supported: bool) -> Self {
        lock(&self.driver.state).native_fence = supported;
        self
    }

    pub(crate) fn force_prime(mut self, enabled: bool) -> Self {
        self.force_prime = enabled;
        self
    }

    pub(crate) fn main_device(mut self, device: u64) -> Self {
        self.main_device = DeviceId(device);
        self
    }

    /// Replaces the compositor's default formats.
    pub(crate) fn compositor_formats(mut self, pairs: &[(Fourcc, Modifier)]) -> Self {
        self.compositor = FormatList::new(
            pairs
                .iter()
                .map(|(fourcc, modifier)| FormatEntry::new(*fourcc, [*modifier])),
        )
        .shared();
        self
    }

    pub(crate) fn render_device(&self) -> DeviceId {
        RENDER_DEVICE
    }

    pub(crate) fn desc(&self) -> DisplayDesc {
        let driver: Arc<dyn GpuDriver> = self.driver.clone();
        let allocator: Arc<dyn BufferAllocator> = self.allocator.clone();
        let syncobj: Arc<dyn SyncobjDevice> = self.syncobj.clone();
        let dmabuf_sync: Arc<dyn DmabufSync> = self.dmabuf_sync.clone();
        DisplayDesc {
            services: DisplayServices {
                driver,
                allocator,
                syncobj: self.use_syncobj.then_some(syncobj),
                dmabuf_sync: Some(dmabuf_sync),
            },
            driver_formats: FormatList::new([
                FormatEntry::new(Fourcc::XRGB8888, DRIVER_MODIFIERS),
                FormatEntry::new(Fourcc::ARGB8888, DRIVER_MODIFIERS),
            ])
            .shared(),
            default_feedback: NegotiatedFeedback {
                formats: Arc::clone(&self.compositor),
                main_device: self.main_device,
            },
            render_devices: vec![RENDER_DEVICE],
            force_prime: self.force_prime,
            implicit_sync: self.implicit_sync,
            config: PresentConfig::default(),
            features: Arc::clone(&self.features),
        }
    }

    pub(crate) fn build(&self) -> Arc<DisplayInstance> {
        DisplayInstance::new(self.desc())
    }
}
