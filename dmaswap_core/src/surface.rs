// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Window surfaces.
//!
//! A [`Surface`] ties one native window to one compositor channel and one
//! driver rendering surface. Two threads touch it:
//!
//! - the rendering thread, through [`Surface::submit_frame`] and the other
//!   entry points;
//! - a driver thread, through the update callback handed to
//!   [`GpuDriver::create_render_surface`](crate::platform::GpuDriver::create_render_surface),
//!   and the window, through [`WindowListener`].
//!
//! Cross-thread parameters (pending size, swap interval, a reentrancy guard
//! and whether the window is still alive) sit behind a small mutex that is
//! never held across a driver or channel call. Everything else, including
//! the channel and the swapchain, sits behind a second mutex owned by
//! whichever thread is working on buffers.

use core::fmt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};

use crate::channel::{BufferId, ChannelCapabilities, DamageRect, SurfaceChannel, SurfaceEvent};
use crate::config::{SurfaceAttributes, WindowConfig};
use crate::display::{DisplayInstance, SurfaceKey, SurfaceRegistration};
use crate::error::{AllocationError, NegotiationError, SurfaceError};
use crate::feedback::{SurfaceFeedback, SurfaceModifiers};
use crate::format::{FormatEntry, Fourcc, Modifier, find_opaque_format, pick_default_modifiers};
use crate::frame::{CommitRequest, FramePhase, commit_frame, sync_rendering};
use crate::pacing::Pacing;
use crate::platform::{RenderSurfaceId, UpdateCallback};
use crate::swapchain::{PresentBuffer, Swapchain, SwapchainDesc};

/// Notifications from a native window.
pub trait WindowListener: Send + Sync {
    /// The window was resized. Non-positive sizes are ignored.
    fn resized(&self, width: i32, height: i32);

    /// The window was destroyed.
    fn destroyed(&self);
}

/// A native window handle, the analogue of `wl_egl_window`.
pub trait NativeWindow: fmt::Debug + Send + Sync {
    /// The compositor surface this window wraps, or [`None`] if the handle
    /// is not usable.
    fn surface_key(&self) -> Option<SurfaceKey>;

    /// Requested size in pixels.
    fn size(&self) -> (i32, i32);

    /// Records the size of the last committed buffer.
    fn set_attached_size(&self, width: u32, height: u32);

    /// Installs or clears the listener.
    fn set_listener(&self, listener: Option<Weak<dyn WindowListener>>);
}

#[derive(Debug)]
struct SurfaceParams {
    pending_width: u32,
    pending_height: u32,
    swap_interval: u32,
    skip_update: u32,
    window_alive: bool,
}

/// State owned by whichever thread is working on buffers.
struct SurfaceState {
    channel: Box<dyn SurfaceChannel>,
    caps: ChannelCapabilities,
    explicit_sync: bool,
    render_surface: Option<RenderSurfaceId>,
    swapchain: Swapchain,
    force_realloc: bool,
    pacing: Pacing,
    feedback: Option<SurfaceFeedback>,
    default_modifiers: Vec<Modifier>,
    surface_modifiers: Vec<Modifier>,
    modifiers_changed: bool,
    deferred: VecDeque<SurfaceEvent>,
    phase: FramePhase,
}

impl fmt::Debug for SurfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceState")
            .field("render_surface", &self.render_surface)
            .field("swapchain", &self.swapchain)
            .field("force_realloc", &self.force_realloc)
            .field("surface_modifiers", &self.surface_modifiers)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl SurfaceState {
    /// Handles everything the channel has queued.
    fn process_events(&mut self) {
        self.swapchain
            .route_events(self.channel.as_mut(), &mut self.deferred);
        while let Some(event) = self.deferred.pop_front() {
            match event {
                SurfaceEvent::Feedback(event) => {
                    let Some(feedback) = self.feedback.as_mut() else {
                        continue;
                    };
                    if let Some(update) = feedback.handle(event) {
                        self.apply_modifiers(update);
                    }
                }
                other => {
                    if !self.pacing.handle(&other) {
                        tracing::trace!(event = ?other, "stale surface event");
                    }
                }
            }
        }
    }

    fn apply_modifiers(&mut self, update: SurfaceModifiers) {
        tracing::debug!(?update, "surface feedback");
        self.surface_modifiers = match update {
            SurfaceModifiers::Direct(modifiers) => modifiers,
            SurfaceModifiers::Prime => Vec::new(),
            SurfaceModifiers::Default => self.default_modifiers.clone(),
        };
        self.modifiers_changed = true;
    }

    fn dispatch(&mut self) -> Result<(), SurfaceError> {
        self.channel.blocking_dispatch()?;
        self.process_events();
        Ok(())
    }
}

struct SurfaceShared {
    display: Arc<DisplayInstance>,
    window: Arc<dyn NativeWindow>,
    config: WindowConfig,
    present_fourcc: Fourcc,
    driver_format: FormatEntry,
    params: Mutex<SurfaceParams>,
    state: Mutex<Option<SurfaceState>>,
    registration: SurfaceRegistration,
}

impl fmt::Debug for SurfaceShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceShared")
            .field("key", &self.registration.key())
            .field("config", &self.config)
            .field("present_fourcc", &self.present_fourcc)
            .finish_non_exhaustive()
    }
}

impl WindowListener for SurfaceShared {
    fn resized(&self, width: i32, height: i32) {
        let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
            return;
        };
        if width == 0 || height == 0 {
            return;
        }
        let mut params = self.params();
        params.pending_width = width;
        params.pending_height = height;
    }

    fn destroyed(&self) {
        self.params().window_alive = false;
    }
}

/// Decrements the update-callback guard when dropped.
struct UpdateGuard<'a>(&'a Mutex<SurfaceParams>);

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        let mut params = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        params.skip_update = params.skip_update.saturating_sub(1);
    }
}

impl SurfaceShared {
    fn params(&self) -> MutexGuard<'_, SurfaceParams> {
        self.params.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, Option<SurfaceState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_size(&self) -> (u32, u32) {
        let params = self.params();
        (params.pending_width, params.pending_height)
    }

    /// Builds a swapchain for the current size and modifiers.
    fn build_swapchain(
        &self,
        channel: &mut dyn SurfaceChannel,
        surface_modifiers: &[Modifier],
        explicit_sync: bool,
    ) -> Result<Swapchain, AllocationError> {
        let (width, height) = self.pending_size();
        let prime = surface_modifiers.is_empty();
        let desc = SwapchainDesc {
            width,
            height,
            render_fourcc: self.config.fourcc,
            present_fourcc: self.present_fourcc,
            prime,
            modifiers: if prime {
                &self.driver_format.modifiers
            } else {
                surface_modifiers
            },
            explicit_sync,
        };
        Swapchain::create(&self.display, channel, &desc)
    }

    /// Builds a replacement swapchain if the size changed, a reallocation
    /// was forced, or (when `allow_modifier_realloc`) new surface feedback
    /// rules out the current layout.
    fn realloc(
        &self,
        state: &mut SurfaceState,
        allow_modifier_realloc: bool,
    ) -> Result<Option<Swapchain>, AllocationError> {
        let (width, height) = self.pending_size();
        let current = &state.swapchain;
        let needs_new = if state.force_realloc
            || width != current.width()
            || height != current.height()
        {
            true
        } else if allow_modifier_realloc
            && self.display.config().allow_modifier_realloc
            && state.modifiers_changed
        {
            if current.is_prime() {
                !state.surface_modifiers.is_empty()
            } else {
                !state.surface_modifiers.contains(&current.modifier())
            }
        } else {
            false
        };

        if !needs_new {
            if allow_modifier_realloc {
                state.modifiers_changed = false;
            }
            return Ok(None);
        }
        tracing::debug!(
            width,
            height,
            forced = state.force_realloc,
            "reallocating swapchain"
        );
        let swapchain = self.build_swapchain(
            state.channel.as_mut(),
            &state.surface_modifiers,
            state.explicit_sync,
        )?;
        if allow_modifier_realloc {
            state.modifiers_changed = false;
        }
        Ok(Some(swapchain))
    }

    /// Points the driver at `swapchain` and retires the old one. On failure
    /// the replacement is released, the next frame reallocates, and `false`
    /// is returned.
    fn install_swapchain(&self, state: &mut SurfaceState, swapchain: Swapchain) -> bool {
        let installed = match state.render_surface {
            Some(surface) => self
                .display
                .driver()
                .set_color_buffers(surface, swapchain.render_buffer()),
            None => Ok(()),
        };
        match installed {
            Ok(()) => {
                let old = core::mem::replace(&mut state.swapchain, swapchain);
                old.release(state.channel.as_mut());
                state.force_realloc = false;
                true
            }
            Err(err) => {
                tracing::warn!(%err, "driver rejected new swapchain; reallocating next frame");
                swapchain.release(state.channel.as_mut());
                state.force_realloc = true;
                false
            }
        }
    }

    fn window_update(&self) {
        {
            let params = self.params();
            if params.skip_update != 0 || !params.window_alive {
                return;
            }
        }
        // A submission in progress reallocates on its own.
        let mut guard = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let Some(state) = guard.as_mut() else {
            return;
        };
        match self.realloc(state, false) {
            Ok(Some(swapchain)) => {
                self.install_swapchain(state, swapchain);
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, "update callback could not reallocate"),
        }
    }

    fn submit_frame(&self, damage: &[DamageRect]) -> Result<(), SurfaceError> {
        let interval = {
            let mut params = self.params();
            if !params.window_alive {
                return Err(SurfaceError::BadNativeWindow);
            }
            params.skip_update += 1;
            params.swap_interval
        };
        let _guard = UpdateGuard(&self.params);

        let mut guard = self.state();
        let state = guard.as_mut().ok_or(SurfaceError::Destroyed)?;
        let result = self.run_frame(state, interval, damage);
        if result.is_err() {
            state.phase.advance(FramePhase::Idle);
        }
        result
    }

    fn run_frame(
        &self,
        state: &mut SurfaceState,
        interval: u32,
        damage: &[DamageRect],
    ) -> Result<(), SurfaceError> {
        state.channel.dispatch_pending()?;
        state.process_events();

        if interval > 0 {
            if state.pacing.is_pending() {
                state.phase.advance(FramePhase::PacingWait);
                while state.pacing.is_pending() {
                    state.dispatch()?;
                }
            }
        } else {
            state.pacing.abandon(state.channel.as_mut());
        }

        let replacement = self.realloc(state, true)?;
        let presented = match self.present(state, interval, damage) {
            Ok(presented) => presented,
            Err(err) => {
                if let Some(swapchain) = replacement {
                    swapchain.release(state.channel.as_mut());
                }
                return Err(err);
            }
        };

        let installed = match replacement {
            Some(swapchain) => self.install_swapchain(state, swapchain),
            None => false,
        };
        if !installed && !state.swapchain.is_prime() {
            self.next_back_buffer(state, presented);
        }
        state.phase.advance(FramePhase::Idle);
        Ok(())
    }

    /// Acquires a buffer, hands off the rendering fence and commits.
    fn present(
        &self,
        state: &mut SurfaceState,
        interval: u32,
        damage: &[DamageRect],
    ) -> Result<BufferId, SurfaceError> {
        let buffer_id = if state.swapchain.is_prime() {
            let id = state
                .swapchain
                .find_free_buffer(state.channel.as_mut(), &mut state.deferred)?;
            let target = state
                .swapchain
                .buffer(id)
                .map(PresentBuffer::color)
                .ok_or(SurfaceError::Destroyed)?;
            self.display
                .driver()
                .copy_color_buffer(state.swapchain.render_buffer(), target)?;
            id
        } else {
            state
                .swapchain
                .current_back()
                .map(PresentBuffer::id)
                .ok_or(SurfaceError::Destroyed)?
        };
        state.phase.advance(FramePhase::BufferAcquired);

        let buffer = state
            .swapchain
            .buffer_mut(buffer_id)
            .ok_or(SurfaceError::Destroyed)?;
        let handoff = sync_rendering(&self.display, buffer)?;
        tracing::trace!(?handoff, "rendering synced");
        state.phase.advance(FramePhase::Synced);

        let request = CommitRequest {
            buffer: buffer_id,
            damage,
            interval,
            margin: self.display.config().commit_timestamp_margin,
        };
        commit_frame(
            state.channel.as_mut(),
            state.caps,
            &mut state.pacing,
            buffer,
            &request,
        );
        state.swapchain.mark_in_use(buffer_id);
        state.phase.advance(FramePhase::Submitted);

        if self.params().window_alive {
            self.window
                .set_attached_size(state.swapchain.width(), state.swapchain.height());
        }
        if let Err(err) = state.channel.flush() {
            tracing::warn!(%err, "flushing frame requests failed");
        }
        Ok(buffer_id)
    }

    /// Picks the back buffer for the next frame. Failure only forces a
    /// reallocation; the frame is already submitted.
    fn next_back_buffer(&self, state: &mut SurfaceState, presented: BufferId) {
        let next = match state
            .swapchain
            .find_free_buffer(state.channel.as_mut(), &mut state.deferred)
        {
            Ok(next) => next,
            Err(err) => {
                tracing::warn!(%err, "no back buffer for next frame; reallocating");
                state.force_realloc = true;
                return;
            }
        };
        let Some(color) = state.swapchain.buffer(next).map(PresentBuffer::color) else {
            state.force_realloc = true;
            return;
        };
        if let Some(surface) = state.render_surface {
            if let Err(err) = self.display.driver().set_color_buffers(surface, color) {
                tracing::warn!(%err, "driver rejected back buffer; reallocating");
                state.force_realloc = true;
                return;
            }
        }
        state.swapchain.set_back(next);
        state.swapchain.update_buffer_age(presented);
    }

    fn wait_for_gpu_and_protocol(&self) -> Result<(), SurfaceError> {
        self.display.driver().finish();
        let mut guard = self.state();
        let Some(state) = guard.as_mut() else {
            return Ok(());
        };
        state.channel.dispatch_pending()?;
        state.process_events();
        while state.pacing.is_displaying() {
            state.dispatch()?;
        }
        Ok(())
    }

    fn teardown(&self) {
        self.params().skip_update += 1;

        // The driver waits for a running update callback, which may need the
        // state lock.
        let render_surface = self
            .state()
            .as_mut()
            .and_then(|state| state.render_surface.take());
        if let Some(surface) = render_surface {
            self.display.driver().destroy_render_surface(surface);
        }
        self.window.set_listener(None);

        let Some(mut state) = self.state().take() else {
            return;
        };
        let channel = state.channel.as_mut();
        state.pacing.shutdown(channel);
        state.swapchain.release(channel);
        state.feedback = None;
        channel.shutdown();
        if let Err(err) = channel.flush() {
            tracing::debug!(%err, "flush during teardown failed");
        }
        tracing::debug!(key = ?self.registration.key(), "surface destroyed");
    }
}

/// A presentable window surface.
#[derive(Debug)]
pub struct Surface {
    shared: Arc<SurfaceShared>,
}

impl Surface {
    /// Creates a surface presenting `window` through `channel`.
    ///
    /// Fails without leaving anything allocated if the window is unusable,
    /// the config cannot back windows, another surface already presents to
    /// the same compositor surface, or no format/modifier can be agreed on.
    pub fn create(
        display: &Arc<DisplayInstance>,
        config: &WindowConfig,
        window: Arc<dyn NativeWindow>,
        mut channel: Box<dyn SurfaceChannel>,
        attributes: SurfaceAttributes,
    ) -> Result<Self, SurfaceError> {
        let key = window.surface_key().ok_or(SurfaceError::BadNativeWindow)?;
        if !config.window {
            return Err(SurfaceError::BadConfig);
        }
        let driver_format = display
            .driver_formats()
            .find(config.fourcc)
            .ok_or(NegotiationError::UnsupportedFormat(config.fourcc))?
            .clone();
        let registration = display.register_surface(key)?;

        let present_fourcc = if attributes.present_opaque {
            find_opaque_format(config.fourcc)
                .ok_or(NegotiationError::NoOpaqueFormat(config.fourcc))?
        } else {
            config.fourcc
        };

        let (width, height) = window.size();
        let params = SurfaceParams {
            pending_width: u32::try_from(width).unwrap_or(0).max(1),
            pending_height: u32::try_from(height).unwrap_or(0).max(1),
            swap_interval: 1,
            skip_update: 0,
            window_alive: true,
        };

        let shared = Arc::new(SurfaceShared {
            display: Arc::clone(display),
            window: Arc::clone(&window),
            config: *config,
            present_fourcc,
            driver_format,
            params: Mutex::new(params),
            state: Mutex::new(None),
            registration,
        });

        let state = match shared.initial_state(channel.as_mut()) {
            Ok(parts) => parts.into_state(channel),
            Err(err) => {
                channel.shutdown();
                return Err(err);
            }
        };
        let render_buffer = state.swapchain.render_buffer();
        *shared.state() = Some(state);
        let surface = Self { shared };

        let weak = Arc::downgrade(&surface.shared);
        let on_update: UpdateCallback = Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.window_update();
            }
        });
        let render_surface = display
            .driver()
            .create_render_surface(config.id, render_buffer, on_update)?;
        // Dropping `surface` on the error path above tears everything down.
        if let Some(state) = surface.shared.state().as_mut() {
            state.render_surface = Some(render_surface);
        }

        let listener: Weak<dyn WindowListener> = Arc::<SurfaceShared>::downgrade(&surface.shared);
        window.set_listener(Some(listener));
        tracing::debug!(?key, fourcc = ?config.fourcc, ?present_fourcc, "surface created");
        Ok(surface)
    }

    /// Presents the current back buffer.
    ///
    /// `damage` lists changed rectangles in buffer coordinates; an empty
    /// list damages everything. On failure nothing was committed and the
    /// previous frame stays on screen.
    pub fn submit_frame(&self, damage: &[DamageRect]) -> Result<(), SurfaceError> {
        self.shared.submit_frame(damage)
    }

    /// Sets how many refresh cycles each frame waits. Negative values mean
    /// zero.
    pub fn set_swap_interval(&self, interval: i32) {
        self.shared.params().swap_interval = u32::try_from(interval).unwrap_or(0);
    }

    /// Blocks until rendering has finished and, where the compositor
    /// supports it, the last frame has been shown.
    pub fn wait_for_gpu_and_protocol(&self) -> Result<(), SurfaceError> {
        self.shared.wait_for_gpu_and_protocol()
    }

    /// Frames since the back buffer was last presented, or zero under
    /// PRIME or before the first frame.
    #[must_use]
    pub fn buffer_age(&self) -> u32 {
        self.shared
            .state()
            .as_ref()
            .and_then(|state| state.swapchain.current_back().map(PresentBuffer::age))
            .unwrap_or(0)
    }

    /// Reallocates for a new window size outside of a submission. This is
    /// what the driver's update callback runs.
    pub fn window_update(&self) {
        self.shared.window_update();
    }

    /// Size of the current swapchain.
    #[must_use]
    pub fn size(&self) -> Option<(u32, u32)> {
        self.shared
            .state()
            .as_ref()
            .map(|state| (state.swapchain.width(), state.swapchain.height()))
    }

    /// Whether the current swapchain presents through PRIME.
    #[must_use]
    pub fn is_prime(&self) -> Option<bool> {
        self.shared
            .state()
            .as_ref()
            .map(|state| state.swapchain.is_prime())
    }

    /// Tears the surface down and frees its compositor surface key.
    pub fn destroy(self) {
        drop(self);
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

/// State built during creation, before the channel is moved in.
struct InitialState {
    caps: ChannelCapabilities,
    explicit_sync: bool,
    swapchain: Swapchain,
    pacing: Pacing,
    feedback: Option<SurfaceFeedback>,
    default_modifiers: Vec<Modifier>,
    surface_modifiers: Vec<Modifier>,
}

impl InitialState {
    fn into_state(self, channel: Box<dyn SurfaceChannel>) -> SurfaceState {
        SurfaceState {
            channel,
            caps: self.caps,
            explicit_sync: self.explicit_sync,
            render_surface: None,
            swapchain: self.swapchain,
            force_realloc: false,
            pacing: self.pacing,
            feedback: self.feedback,
            default_modifiers: self.default_modifiers,
            surface_modifiers: self.surface_modifiers,
            modifiers_changed: false,
            deferred: VecDeque::new(),
            phase: FramePhase::Idle,
        }
    }
}

impl SurfaceShared {
    fn initial_state(&self, channel: &mut dyn SurfaceChannel) -> Result<InitialState, SurfaceError> {
        let display = &self.display;
        let caps = channel.capabilities();
        let explicit_sync = display.explicit_sync(caps.explicit_sync);
        if explicit_sync {
            channel.enable_explicit_sync()?;
        }

        let default_modifiers = pick_default_modifiers(
            &self.driver_format,
            display.default_formats(),
            self.present_fourcc,
            display.force_prime(),
        );
        if default_modifiers.is_empty()
            && !display
                .default_formats()
                .supports(self.present_fourcc, Modifier::LINEAR)
        {
            return Err(NegotiationError::NoCommonModifier(self.present_fourcc).into());
        }

        let mut feedback = None;
        let mut surface_modifiers = default_modifiers.clone();
        if caps.surface_feedback && !display.force_prime() {
            let mut state = SurfaceFeedback::new(
                self.present_fourcc,
                self.driver_format.modifiers.clone(),
                display.render_devices().to_vec(),
            );
            channel.subscribe_surface_feedback()?;
            // The first batch normally arrives within one roundtrip; if it
            // does not, the default modifiers stand.
            channel.roundtrip()?;
            while let Some(event) = channel.next_event() {
                if let SurfaceEvent::Feedback(event) = event {
                    match state.handle(event) {
                        Some(SurfaceModifiers::Direct(modifiers)) => surface_modifiers = modifiers,
                        Some(SurfaceModifiers::Prime) => surface_modifiers.clear(),
                        Some(SurfaceModifiers::Default) => {
                            surface_modifiers.clone_from(&default_modifiers);
                        }
                        None => {}
                    }
                }
            }
            feedback = Some(state);
        }

        let swapchain = self.build_swapchain(channel, &surface_modifiers, explicit_sync)?;
        Ok(InitialState {
            caps,
            explicit_sync,
            swapchain,
            pacing: Pacing::new(channel.presentation_clock(), display.config().default_refresh),
            feedback,
            default_modifiers,
            surface_modifiers,
        })
    }
}
