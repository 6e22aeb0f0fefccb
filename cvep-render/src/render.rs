use std::sync::Arc;
use std::time::Duration;

use bytemuck::{cast_slice, cast_slice_mut};
use cvep_core::{
    CommitHook, CommitStamp, ContractError, OnCommit, Placement, SymbolHandle, SymbolId,
    SymbolRegistry,
};
use cvep_timing::{CalibrationStats, HighPrecisionTimer, Timer};
use tiny_skia::{Color, Pixmap, Rect};
use tracing::{debug, trace};

use crate::assets::scale_to;
use crate::{Display, RenderError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub clear: Duration,
    pub draw: Duration,
    pub copy: Duration,
    pub present: Duration,
    pub total: Duration,
    pub dirty_count: usize,
    pub symbols_drawn: usize,
}

/// Owns every symbol's state assets and commits whole frames to a [`Display`].
///
/// A commit clears what the previous frame drew, draws the default state of
/// every default-visible symbol, draws the selected states, copies the touched
/// regions into the display's back buffer and swaps once. Hooks queued with
/// [`OnCommit::call_on_commit`] run right after that swap.
pub struct StimulusRenderer<D: Display, T: Timer<Timestamp = u64> = HighPrecisionTimer> {
    display: D,
    width: u32,
    height: u32,
    center: (f32, f32),

    registry: SymbolRegistry<Arc<Pixmap>>,

    // Rendering state
    canvas: Pixmap,
    clear_buffer: Vec<u8>,
    dirty_regions: Vec<Rect>,
    first_frame: bool,
    selected: Vec<bool>,
    overlay: Option<(Pixmap, (f32, f32))>,

    pending_hooks: Vec<CommitHook>,
    commits: u64,
    last_commit_ns: Option<u64>,
    last_stats: Option<FrameStats>,
    timer: T,
}

impl<D: Display> StimulusRenderer<D> {
    pub fn new(display: D) -> Result<Self, RenderError> {
        Self::with_timer(display, HighPrecisionTimer::new())
    }
}

impl<D: Display, T: Timer<Timestamp = u64>> StimulusRenderer<D, T> {
    pub fn with_timer(display: D, timer: T) -> Result<Self, RenderError> {
        let (width, height) = display.size();
        let canvas =
            Pixmap::new(width, height).ok_or(RenderError::InvalidSize { width, height })?;

        let mut renderer = Self {
            display,
            width,
            height,
            center: (width as f32 / 2.0, height as f32 / 2.0),
            registry: SymbolRegistry::new(),
            canvas,
            clear_buffer: Vec::new(),
            dirty_regions: Vec::with_capacity(64),
            first_frame: true,
            selected: Vec::new(),
            overlay: None,
            pending_hooks: Vec::new(),
            commits: 0,
            last_commit_ns: None,
            last_stats: None,
            timer,
        };
        renderer.set_background([0, 0, 0, 255]);
        Ok(renderer)
    }

    /// Window colour behind the symbols. Takes effect on the next commit.
    pub fn set_background(&mut self, rgba: [u8; 4]) {
        let [r, g, b, a] = rgba;
        let premultiplied = Color::from_rgba8(r, g, b, a).premultiply().to_color_u8();
        let px = [
            premultiplied.red(),
            premultiplied.green(),
            premultiplied.blue(),
            premultiplied.alpha(),
        ];
        self.clear_buffer = px
            .into_iter()
            .cycle()
            .take((self.width * self.height * 4) as usize)
            .collect();
        self.first_frame = true;
    }

    /// Put `pixmap` on top of the symbols, centred on `position` (same
    /// coordinates as symbol placements), or remove it with `None`. It stays
    /// on every commit until replaced, including during trials.
    pub fn set_overlay(&mut self, overlay: Option<(Pixmap, (f32, f32))>) {
        self.overlay = overlay;
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Register a symbol. Assets are scaled to the placement size (when it is
    /// positive); state 0 becomes the default state, shown while no trial runs.
    pub fn add_symbol(
        &mut self,
        name: impl Into<SymbolId>,
        states: Vec<Pixmap>,
        placement: Placement,
    ) -> Result<SymbolHandle, RenderError> {
        let id = name.into();
        if self.registry.get(&id).is_some() {
            return Err(ContractError::DuplicateSymbol { symbol: id }.into());
        }

        let target = (
            placement.size.0.round() as i64,
            placement.size.1.round() as i64,
        );
        let states = states
            .into_iter()
            .map(|pm| {
                if target.0 > 0 && target.1 > 0 {
                    scale_to(pm, (target.0 as u32, target.1 as u32)).map(Arc::new)
                } else {
                    Ok(Arc::new(pm))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let handle = self.registry.register(id.clone(), states, placement)?;
        debug!(symbol = %id, states = self.registry.entry(handle).map_or(0, |e| e.state_count()), "symbol added");
        Ok(handle)
    }

    pub fn set_default_visible(&mut self, name: &SymbolId, visible: bool) -> Result<(), RenderError> {
        self.registry.set_default_visible(name, visible)?;
        Ok(())
    }

    pub fn set_all_default_visible(&mut self, visible: bool) {
        self.registry.set_all_default_visible(visible);
    }

    pub fn default_visibility(&self) -> Vec<bool> {
        self.registry.default_visibility()
    }

    pub fn restore_default_visibility(&mut self, snapshot: &[bool]) {
        self.registry.restore_default_visibility(snapshot);
    }

    pub fn registry(&self) -> &SymbolRegistry<Arc<Pixmap>> {
        &self.registry
    }

    pub fn handle(&self, name: &SymbolId) -> Result<SymbolHandle, ContractError> {
        self.registry.handle(name)
    }

    /// Pixel at the centre of a symbol, in display coordinates.
    pub fn symbol_center(&self, name: &SymbolId) -> Option<(u32, u32)> {
        let entry = self.registry.get(name)?;
        let (x, y) = to_screen(self.center, entry.placement().position);
        (x >= 0.0 && y >= 0.0).then_some((x as u32, y as u32))
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Commits performed so far.
    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn frame_stats(&self) -> Option<FrameStats> {
        self.last_stats
    }

    /// Statistics of the intervals between recent commits.
    pub fn calibration_stats(&self) -> CalibrationStats {
        self.timer.calibration_stats()
    }

    pub fn pending_hooks(&self) -> usize {
        self.pending_hooks.len()
    }

    /// Drop hooks queued for the next commit. Returns how many were dropped.
    pub fn discard_pending_hooks(&mut self) -> usize {
        let n = self.pending_hooks.len();
        self.pending_hooks.clear();
        n
    }

    /// Commit using symbol names instead of handles.
    pub fn commit_named(&mut self, selections: &[(SymbolId, u8)]) -> Result<CommitStamp, RenderError> {
        let resolved = selections
            .iter()
            .map(|(id, state)| Ok((self.registry.handle(id)?, *state)))
            .collect::<Result<Vec<_>, ContractError>>()?;
        self.commit_frame(&resolved)
    }

    /// Draw the selected state of each listed symbol plus default states, then swap once.
    ///
    /// Every selection is validated before anything is drawn: an unknown handle or a
    /// state index past the symbol's assets fails without touching the display.
    pub fn commit_frame(&mut self, selections: &[(SymbolHandle, u8)]) -> Result<CommitStamp, RenderError> {
        for &(handle, state) in selections {
            self.registry.check_state(handle, state)?;
        }
        let expected = (self.width * self.height * 4) as usize;
        let actual = self.display.frame_mut().len();
        if actual != expected {
            return Err(RenderError::FrameSize { expected, actual });
        }

        let t_start = self.timer.now();

        if self.first_frame {
            self.first_frame = false;
            self.canvas.data_mut().copy_from_slice(&self.clear_buffer);
            self.display
                .frame_mut()
                .copy_from_slice(&self.clear_buffer);
            self.dirty_regions.clear();
        }

        // 1) CLEAR what the previous frame drew
        let old_dirty = std::mem::take(&mut self.dirty_regions);
        self.clear_dirty(&old_dirty);
        let t_clear = self.timer.elapsed(t_start);

        // 2) DRAW defaults, then the selected states
        let t = self.timer.now();
        let symbols_drawn = self.draw_symbols(selections);
        let t_draw = self.timer.elapsed(t);

        // 3) COPY old and new dirty regions into the back buffer
        let t = self.timer.now();
        let mut present_rects = old_dirty;
        present_rects.extend_from_slice(&self.dirty_regions);
        coalesce_dirty(&mut present_rects);
        {
            let frame = self.display.frame_mut();
            for rect in &present_rects {
                copy_region(&self.canvas, *rect, frame);
            }
        }
        let t_copy = self.timer.elapsed(t);

        // 4) SWAP
        let t = self.timer.now();
        self.display.present()?;
        let committed_ns = self.timer.now();
        let t_present = self.timer.elapsed(t);

        if let Some(prev) = self.last_commit_ns {
            self.timer
                .record_frame(Duration::from_nanos(committed_ns.saturating_sub(prev)));
        }
        self.last_commit_ns = Some(committed_ns);

        let stamp = CommitStamp {
            frame: self.commits,
            timestamp_ns: committed_ns,
        };
        self.commits += 1;

        let stats = FrameStats {
            clear: t_clear,
            draw: t_draw,
            copy: t_copy,
            present: t_present,
            total: self.timer.elapsed(t_start),
            dirty_count: present_rects.len(),
            symbols_drawn,
        };
        self.last_stats = Some(stats);
        trace!(
            frame = stamp.frame,
            symbols = symbols_drawn,
            draw_us = t_draw.as_micros() as u64,
            present_us = t_present.as_micros() as u64,
            "frame committed"
        );

        for hook in std::mem::take(&mut self.pending_hooks) {
            hook(&stamp);
        }

        Ok(stamp)
    }

    /// Commit `frames + 1` frames showing only default states and report the
    /// effective refresh rate, or `None` when no time elapsed.
    pub fn measure_frame_rate(&mut self, frames: usize) -> Result<Option<f64>, RenderError> {
        let first = self.commit_frame(&[])?;
        let mut last = first;
        for _ in 0..frames {
            last = self.commit_frame(&[])?;
        }
        let elapsed_ns = last.timestamp_ns.saturating_sub(first.timestamp_ns);
        if frames == 0 || elapsed_ns == 0 {
            return Ok(None);
        }
        Ok(Some(frames as f64 * 1e9 / elapsed_ns as f64))
    }

    fn draw_symbols(&mut self, selections: &[(SymbolHandle, u8)]) -> usize {
        self.selected.clear();
        self.selected.resize(self.registry.len(), false);
        for &(handle, _) in selections {
            self.selected[handle.index()] = true;
        }

        let mut drawn = 0;
        for (handle, entry) in self.registry.iter() {
            if !entry.default_visible() || self.selected[handle.index()] {
                continue;
            }
            let pos = to_screen(self.center, entry.placement().position);
            if let Some(rect) = blit(&mut self.canvas, &entry.states()[0], pos) {
                self.dirty_regions.push(rect);
            }
            drawn += 1;
        }

        for &(handle, state) in selections {
            let Some(entry) = self.registry.entry(handle) else {
                continue;
            };
            let pos = to_screen(self.center, entry.placement().position);
            if let Some(rect) = blit(&mut self.canvas, &entry.states()[state as usize], pos) {
                self.dirty_regions.push(rect);
            }
            drawn += 1;
        }

        if let Some((pixmap, position)) = &self.overlay {
            let pos = to_screen(self.center, *position);
            if let Some(rect) = blit(&mut self.canvas, pixmap, pos) {
                self.dirty_regions.push(rect);
            }
        }
        drawn
    }

    fn clear_dirty(&mut self, dirty: &[Rect]) {
        let stride = self.width as usize * 4;
        let (width, height) = (self.width as f32, self.height as f32);
        let canvas_data = self.canvas.data_mut();

        for rect in dirty {
            let x0 = rect.x().floor().max(0.0).min(width) as usize;
            let y0 = rect.y().floor().max(0.0).min(height) as usize;
            let x1 = (rect.x() + rect.width()).ceil().min(width) as usize;
            let y1 = (rect.y() + rect.height()).ceil().min(height) as usize;
            if x1 <= x0 || y1 <= y0 {
                continue;
            }
            let row_len = (x1 - x0) * 4;
            for y in y0..y1 {
                let off = y * stride + x0 * 4;
                canvas_data[off..off + row_len]
                    .copy_from_slice(&self.clear_buffer[off..off + row_len]);
            }
        }
    }
}

impl<D: Display, T: Timer<Timestamp = u64>> OnCommit for StimulusRenderer<D, T> {
    fn call_on_commit(&mut self, hook: CommitHook) {
        self.pending_hooks.push(hook);
    }
}

/// Centre-relative, y-up coordinates to canvas pixels.
fn to_screen(center: (f32, f32), position: (f32, f32)) -> (f32, f32) {
    (center.0 + position.0, center.1 - position.1)
}

/// Draw `src` centred on `pos`, clipped to the canvas. Returns the touched region.
fn blit(canvas: &mut Pixmap, src: &Pixmap, pos: (f32, f32)) -> Option<Rect> {
    let w = src.width() as i32;
    let h = src.height() as i32;
    let cw = canvas.width() as i32;
    let ch = canvas.height() as i32;

    // Compute top-left corner
    let x0 = (pos.0 - w as f32 * 0.5).floor() as i32;
    let y0 = (pos.1 - h as f32 * 0.5).floor() as i32;

    let dst_x_start = x0.max(0);
    let dst_y_start = y0.max(0);
    let dst_x_end = (x0 + w).min(cw);
    let dst_y_end = (y0 + h).min(ch);
    if dst_x_end <= dst_x_start || dst_y_end <= dst_y_start {
        return None;
    }

    let src_x_start = (dst_x_start - x0) as usize;
    let src_y_start = (dst_y_start - y0) as usize;
    let copy_w = (dst_x_end - dst_x_start) as usize;
    let copy_h = (dst_y_end - dst_y_start) as usize;
    let (dst_x, dst_y) = (dst_x_start as usize, dst_y_start as usize);

    let src_stride = src.width() as usize;
    let dst_stride = canvas.width() as usize;
    let src_u32: &[u32] = cast_slice(src.data());
    let dst_u32: &mut [u32] = cast_slice_mut(canvas.data_mut());

    let fully_opaque = (0..copy_h).all(|row| {
        let start = (src_y_start + row) * src_stride + src_x_start;
        src_u32[start..start + copy_w]
            .iter()
            .all(|&s| s >> 24 == 0xFF)
    });

    if fully_opaque {
        for row in 0..copy_h {
            let s = (src_y_start + row) * src_stride + src_x_start;
            let d = (dst_y + row) * dst_stride + dst_x;
            dst_u32[d..d + copy_w].copy_from_slice(&src_u32[s..s + copy_w]);
        }
    } else {
        // Premultiplied "over"
        for row in 0..copy_h {
            let s_row = (src_y_start + row) * src_stride + src_x_start;
            let d_row = (dst_y + row) * dst_stride + dst_x;
            for i in 0..copy_w {
                let s = src_u32[s_row + i];
                let d = dst_u32[d_row + i];
                let inv = 255 - (s >> 24);
                let mut out = 0u32;
                for shift in [0, 8, 16, 24] {
                    let sc = (s >> shift) & 0xFF;
                    let dc = (d >> shift) & 0xFF;
                    let c = (sc + (dc * inv + 127) / 255).min(255);
                    out |= c << shift;
                }
                dst_u32[d_row + i] = out;
            }
        }
    }

    Rect::from_xywh(dst_x as f32, dst_y as f32, copy_w as f32, copy_h as f32)
}

fn copy_region(canvas: &Pixmap, dirty: Rect, frame_buffer: &mut [u8]) {
    let (width, height) = (canvas.width() as f32, canvas.height() as f32);
    let x0 = dirty.x().floor().max(0.0).min(width) as usize;
    let y0 = dirty.y().floor().max(0.0).min(height) as usize;
    let x1 = (dirty.x() + dirty.width()).ceil().min(width) as usize;
    let y1 = (dirty.y() + dirty.height()).ceil().min(height) as usize;
    if x1 <= x0 || y1 <= y0 {
        return;
    }

    let bytes = (x1 - x0) * 4;
    let row_bytes = canvas.width() as usize * 4;
    let canvas_data = canvas.data();
    for row in y0..y1 {
        let off = row * row_bytes + x0 * 4;
        frame_buffer[off..off + bytes].copy_from_slice(&canvas_data[off..off + bytes]);
    }
}

fn coalesce_dirty(rects: &mut Vec<Rect>) {
    rects.sort_by(|a, b| a.y().total_cmp(&b.y()).then(a.x().total_cmp(&b.x())));
    let mut out: Vec<Rect> = Vec::with_capacity(rects.len());
    for r in rects.drain(..) {
        if let Some(last) = out.last_mut() {
            let same_row =
                (r.y() - last.y()).abs() < 1.0 && (r.height() - last.height()).abs() < 1.0;
            let touching = r.x() <= last.x() + last.width() + 1.0;
            if same_row && touching {
                let nx = last.x().min(r.x());
                let nx2 = (last.x() + last.width()).max(r.x() + r.width());
                if let Some(merged) = Rect::from_xywh(nx, last.y(), nx2 - nx, last.height()) {
                    *last = merged;
                    continue;
                }
            }
        }
        out.push(r);
    }
    *rects = out;
}
