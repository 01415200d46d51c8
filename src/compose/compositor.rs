//! Multi-layer alpha compositor with viewport-aware cropping.
//!
//! Each composite call resolves every layer in ascending z order, falls back
//! to cached frames when a source yields nothing new, crops content layers to
//! the viewport when zoomed, scales to the layer's declared geometry, and
//! blends with the straight-alpha "over" operator. A failing layer degrades
//! to being skipped for that call; it never aborts the composite.

use std::sync::Arc;

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::compose::blend::over_row_in_place;
use crate::compose::layer::{FrameFilter, Layer, LayerContent, LayerId, LayerOpts};
use crate::compose::viewport::Viewport;
use crate::foundation::core::Frame;
use crate::source::FrameSource;

/// Options controlling compositor behavior.
#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct CompositorOpts {
    /// Prefetch source-backed layers concurrently (rayon) before the
    /// deterministic sequential blend pass.
    pub parallel: bool,
}

/// Merges N layers into one viewport-aware output image.
pub struct LayerCompositor {
    width: u32,
    height: u32,
    background: [u8; 4],
    viewport: Viewport,
    layers: Vec<Layer>,
    next_id: u64,
    opts: CompositorOpts,
}

impl LayerCompositor {
    /// Create a compositor with an opaque black background.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_opts(width, height, CompositorOpts::default())
    }

    /// Create a compositor with explicit options.
    pub fn with_opts(width: u32, height: u32, opts: CompositorOpts) -> Self {
        Self {
            width,
            height,
            background: [0, 0, 0, 255],
            viewport: Viewport::new(),
            layers: Vec::new(),
            next_id: 0,
            opts,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Change the output canvas size; takes effect on the next composite.
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Background color the canvas is filled with, at full opacity.
    pub fn set_background(&mut self, rgba: [u8; 4]) {
        self.background = rgba;
    }

    /// Add a layer and return its identity. Z ties stack in insertion order.
    pub fn add_layer(&mut self, content: LayerContent, opts: LayerOpts) -> LayerId {
        let id = LayerId(self.next_id);
        self.next_id += 1;
        self.layers.push(Layer {
            id,
            z_index: opts.z_index,
            depth: opts.depth,
            x: opts.x,
            y: opts.y,
            width: opts.width,
            height: opts.height,
            content,
            filter: None,
            cached: None,
        });
        id
    }

    /// Remove a layer; returns whether it existed.
    pub fn remove_layer(&mut self, id: LayerId) -> bool {
        let before = self.layers.len();
        self.layers.retain(|l| l.id != id);
        self.layers.len() != before
    }

    /// Borrow a layer by identity.
    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    /// Attach (or replace) a layer's image-processing pipeline.
    pub fn set_layer_filter(&mut self, id: LayerId, filter: Box<dyn FrameFilter>) -> bool {
        match self.layers.iter_mut().find(|l| l.id == id) {
            Some(layer) => {
                layer.filter = Some(filter);
                true
            }
            None => false,
        }
    }

    /// Current pan/zoom window.
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Zoom the shared viewport, centered on normalized coordinates.
    pub fn set_zoom(&mut self, level: f64, center_x: f64, center_y: f64) {
        self.viewport.set_zoom(level, center_x, center_y);
    }

    /// Pan the shared viewport by normalized deltas.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.viewport.pan(dx, dy);
    }

    /// Restore the identity viewport.
    pub fn reset_zoom(&mut self) {
        self.viewport.reset();
    }

    /// Merge all layers into one RGBA frame for `timestamp`.
    #[tracing::instrument(skip(self))]
    pub fn composite(&mut self, timestamp: f64) -> Frame {
        let px = (self.width as usize) * (self.height as usize);
        let mut canvas = Vec::with_capacity(px * 4);
        for _ in 0..px {
            canvas.extend_from_slice(&self.background);
        }

        let mut order: SmallVec<[usize; 16]> = (0..self.layers.len()).collect();
        order.sort_by_key(|&i| self.layers[i].z_index);

        let mut prefetched: Vec<Option<Option<Frame>>> = if self.opts.parallel {
            self.layers
                .par_iter()
                .map(|l| match &l.content {
                    LayerContent::Source(src) => Some(poll(src.as_ref(), timestamp)),
                    _ => None,
                })
                .collect()
        } else {
            vec![None; self.layers.len()]
        };

        for &i in &order {
            let fresh = prefetched[i].take();
            let mut guard: SmallVec<[LayerId; 8]> = SmallVec::new();
            let Some(frame) = resolve(&mut self.layers, i, timestamp, fresh, &mut guard) else {
                continue;
            };
            let layer = &self.layers[i];
            let Some((placed, at_x, at_y)) =
                place(&frame, layer, &self.viewport, self.width, self.height)
            else {
                continue;
            };
            blit(&mut canvas, self.width, self.height, &placed, at_x, at_y);
        }

        Frame {
            width: self.width,
            height: self.height,
            data: Arc::new(canvas),
        }
    }

    /// Convenience variant of [`composite`](Self::composite) that discards
    /// alpha.
    pub fn composite_rgb(&mut self, timestamp: f64) -> image::RgbImage {
        let frame = self.composite(timestamp);
        let mut out = Vec::with_capacity((frame.width as usize) * (frame.height as usize) * 3);
        for p in frame.data.chunks_exact(4) {
            out.extend_from_slice(&p[0..3]);
        }
        image::RgbImage::from_raw(frame.width, frame.height, out)
            .unwrap_or_else(|| image::RgbImage::new(frame.width, frame.height))
    }
}

fn poll(src: &dyn FrameSource, timestamp: f64) -> Option<Frame> {
    src.get_frame(timestamp).0
}

/// Resolve one layer's current frame: fresh content, then the layer cache,
/// then the producing source's last-frame snapshot. Updates the cache and
/// applies the filter pipeline.
fn resolve(
    layers: &mut [Layer],
    idx: usize,
    timestamp: f64,
    prefetched: Option<Option<Frame>>,
    guard: &mut SmallVec<[LayerId; 8]>,
) -> Option<Frame> {
    let id = layers[idx].id;
    if guard.contains(&id) {
        tracing::warn!("derived layer cycle involving {id:?}; skipping");
        return None;
    }
    guard.push(id);

    let content = layers[idx].content.clone();
    let fresh = match content {
        LayerContent::Source(src) => match prefetched {
            Some(prefetched) => prefetched,
            None => poll(src.as_ref(), timestamp),
        },
        LayerContent::Image(img) => Some(img),
        LayerContent::Derived(target) => layers
            .iter()
            .position(|l| l.id == target)
            .and_then(|ti| resolve(layers, ti, timestamp, None, guard)),
        LayerContent::Remote { .. } => None,
    };

    let resolved = match fresh {
        Some(frame) => Some(frame),
        None => layers[idx].cached.clone().or_else(|| match &layers[idx].content {
            LayerContent::Source(src) => src.last_frame().map(|(frame, _)| frame),
            _ => None,
        }),
    }?;
    layers[idx].cached = Some(resolved.clone());

    match &layers[idx].filter {
        Some(filter) => match filter.apply(&resolved) {
            Ok(filtered) => Some(filtered),
            Err(e) => {
                tracing::debug!("layer filter failed, using unfiltered frame: {e}");
                Some(resolved)
            }
        },
        None => Some(resolved),
    }
}

/// Crop to the viewport when the layer participates in zoom, then scale to
/// the layer's declared geometry.
fn place(
    frame: &Frame,
    layer: &Layer,
    viewport: &Viewport,
    canvas_w: u32,
    canvas_h: u32,
) -> Option<(Frame, i64, i64)> {
    let mut current = frame.clone();
    if layer.depth != 0.0 && viewport.zoom() > 1.0 {
        current = crop_to_viewport(&current, viewport)?;
    }

    let dst_w = layer.width.unwrap_or(canvas_w);
    let dst_h = layer.height.unwrap_or(canvas_h);
    if dst_w == 0 || dst_h == 0 {
        return None;
    }
    if current.width != dst_w || current.height != dst_h {
        let img = current.to_rgba_image()?;
        let resized =
            image::imageops::resize(&img, dst_w, dst_h, image::imageops::FilterType::Triangle);
        current = Frame::from_rgba_image(resized);
    }
    Some((current, layer.x, layer.y))
}

fn crop_to_viewport(frame: &Frame, viewport: &Viewport) -> Option<Frame> {
    let w = f64::from(frame.width);
    let h = f64::from(frame.height);
    let win = viewport.window();
    let window_px = kurbo::Rect::new(win.x0 * w, win.y0 * h, win.x1 * w, win.y1 * h);
    let clipped = window_px.intersect(kurbo::Rect::new(0.0, 0.0, w, h));
    if clipped.width() < 1.0 || clipped.height() < 1.0 {
        return None;
    }

    let x = clipped.x0.floor() as u32;
    let y = clipped.y0.floor() as u32;
    let cw = (clipped.width().round() as u32).clamp(1, frame.width - x);
    let ch = (clipped.height().round() as u32).clamp(1, frame.height - y);
    let img = frame.to_rgba_image()?;
    let cropped = image::imageops::crop_imm(&img, x, y, cw, ch).to_image();
    Some(Frame::from_rgba_image(cropped))
}

/// Alpha-blend `frame` onto the canvas at `(at_x, at_y)`, clamped to bounds.
fn blit(canvas: &mut [u8], canvas_w: u32, canvas_h: u32, frame: &Frame, at_x: i64, at_y: i64) {
    let cw = i64::from(canvas_w);
    let ch = i64::from(canvas_h);
    let fw = i64::from(frame.width);
    let fh = i64::from(frame.height);

    let x0 = at_x.max(0);
    let y0 = at_y.max(0);
    let x1 = (at_x + fw).min(cw);
    let y1 = (at_y + fh).min(ch);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let row_len = ((x1 - x0) as usize) * 4;
    for y in y0..y1 {
        let src_y = (y - at_y) as usize;
        let dst_off = ((y as usize) * (canvas_w as usize) + (x0 as usize)) * 4;
        let src_off = (src_y * (frame.width as usize) + ((x0 - at_x) as usize)) * 4;
        over_row_in_place(
            &mut canvas[dst_off..dst_off + row_len],
            &frame.data[src_off..src_off + row_len],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::error::{StrobeError, StrobeResult};
    use crate::source::procedural::ProceduralSource;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn image_layer(comp: &mut LayerCompositor, frame: Frame, opts: LayerOpts) -> LayerId {
        comp.add_layer(LayerContent::Image(frame), opts)
    }

    #[test]
    fn z_order_places_higher_layers_on_top() {
        let mut comp = LayerCompositor::new(640, 480);
        image_layer(&mut comp, Frame::solid(640, 480, RED), LayerOpts {
            z_index: 0,
            ..LayerOpts::default()
        });
        image_layer(&mut comp, Frame::solid(100, 100, BLUE), LayerOpts {
            z_index: 1,
            x: 100,
            y: 100,
            width: Some(100),
            height: Some(100),
            ..LayerOpts::default()
        });

        let out = comp.composite(0.0);
        assert_eq!(out.pixel(50, 50), RED);
        assert_eq!(out.pixel(150, 150), BLUE);
    }

    #[test]
    fn z_ties_stack_in_insertion_order() {
        let mut comp = LayerCompositor::new(8, 8);
        image_layer(&mut comp, Frame::solid(8, 8, RED), LayerOpts::default());
        image_layer(&mut comp, Frame::solid(8, 8, BLUE), LayerOpts::default());
        let out = comp.composite(0.0);
        assert_eq!(out.pixel(4, 4), BLUE);
    }

    #[test]
    fn transparent_layer_leaves_background_unchanged() {
        let mut comp = LayerCompositor::new(4, 4);
        comp.set_background([7, 8, 9, 255]);
        image_layer(
            &mut comp,
            Frame::solid(4, 4, [200, 200, 200, 0]),
            LayerOpts::default(),
        );
        let out = comp.composite(0.0);
        assert_eq!(out.pixel(2, 2), [7, 8, 9, 255]);
    }

    #[test]
    fn opaque_layer_reproduces_pixels_exactly() {
        let mut comp = LayerCompositor::new(4, 4);
        comp.set_background([7, 8, 9, 255]);
        image_layer(&mut comp, Frame::solid(4, 4, RED), LayerOpts::default());
        let out = comp.composite(0.0);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(out.pixel(x, y), RED);
            }
        }
    }

    #[test]
    fn zoom_crops_content_layers_but_not_overlays() {
        // 4x4 content: top-left quadrant green, rest red.
        let mut data = Vec::new();
        for y in 0..4u32 {
            for x in 0..4u32 {
                if x < 2 && y < 2 {
                    data.extend_from_slice(&[0, 255, 0, 255]);
                } else {
                    data.extend_from_slice(&RED);
                }
            }
        }
        let content = Frame::new(4, 4, data).unwrap();

        let mut comp = LayerCompositor::new(4, 4);
        image_layer(&mut comp, content.clone(), LayerOpts {
            depth: 1.0,
            ..LayerOpts::default()
        });
        comp.set_zoom(2.0, 0.25, 0.25); // window over the top-left quadrant

        let out = comp.composite(0.0);
        // The green quadrant now fills the whole canvas.
        assert_eq!(out.pixel(0, 0), [0, 255, 0, 255]);
        assert_eq!(out.pixel(3, 3), [0, 255, 0, 255]);

        // Same image as a depth-0 overlay is immune to the zoom.
        let mut overlay_comp = LayerCompositor::new(4, 4);
        image_layer(&mut overlay_comp, content, LayerOpts {
            depth: 0.0,
            ..LayerOpts::default()
        });
        overlay_comp.set_zoom(2.0, 0.25, 0.25);
        let out = overlay_comp.composite(0.0);
        assert_eq!(out.pixel(3, 3), RED);
    }

    #[test]
    fn composite_is_idempotent_without_new_frames() {
        // A dependency-gated procedural source produces exactly one frame,
        // then yields nothing new; the second composite must hit the cache.
        let anchor: Arc<dyn FrameSource> =
            Arc::new(ProceduralSource::new(|_t| Ok(Frame::solid(1, 1, RED))));
        let src = ProceduralSource::with_dependency(
            |_t| Ok(Frame::solid(8, 8, BLUE)),
            Arc::clone(&anchor),
        );
        src.start().unwrap();

        let mut comp = LayerCompositor::new(8, 8);
        comp.add_layer(
            LayerContent::Source(Arc::new(src)),
            LayerOpts::default(),
        );

        let a = comp.composite(0.0);
        let b = comp.composite(0.0);
        assert_eq!(a, b, "no intervening production: outputs must be identical");
        assert_eq!(a.pixel(4, 4), BLUE);
    }

    #[test]
    fn source_layer_falls_back_to_last_frame_snapshot() {
        // Two layers sharing one source: the first poll produces, the second
        // returns nothing new; the sharing layer must recover via the
        // source's last-frame slot.
        let anchor: Arc<dyn FrameSource> =
            Arc::new(ProceduralSource::new(|_t| Ok(Frame::solid(1, 1, RED))));
        let src: Arc<dyn FrameSource> = Arc::new(ProceduralSource::with_dependency(
            |_t| Ok(Frame::solid(8, 8, BLUE)),
            anchor,
        ));
        src.start().unwrap();

        let mut comp = LayerCompositor::new(16, 8);
        comp.add_layer(LayerContent::Source(Arc::clone(&src)), LayerOpts {
            width: Some(8),
            height: Some(8),
            ..LayerOpts::default()
        });
        comp.add_layer(LayerContent::Source(src), LayerOpts {
            x: 8,
            width: Some(8),
            height: Some(8),
            ..LayerOpts::default()
        });

        let out = comp.composite(0.0);
        assert_eq!(out.pixel(4, 4), BLUE);
        assert_eq!(out.pixel(12, 4), BLUE);
    }

    #[test]
    fn failing_filter_falls_back_to_unfiltered_frame() {
        struct Broken;
        impl FrameFilter for Broken {
            fn apply(&self, _frame: &Frame) -> StrobeResult<Frame> {
                Err(StrobeError::render("filter exploded"))
            }
        }

        let mut comp = LayerCompositor::new(4, 4);
        let id = image_layer(&mut comp, Frame::solid(4, 4, RED), LayerOpts::default());
        assert!(comp.set_layer_filter(id, Box::new(Broken)));

        let out = comp.composite(0.0);
        assert_eq!(out.pixel(2, 2), RED);
    }

    #[test]
    fn filter_applies_when_it_succeeds() {
        struct Invert;
        impl FrameFilter for Invert {
            fn apply(&self, frame: &Frame) -> StrobeResult<Frame> {
                let mut data = frame.data.as_ref().clone();
                for p in data.chunks_exact_mut(4) {
                    p[0] = 255 - p[0];
                    p[1] = 255 - p[1];
                    p[2] = 255 - p[2];
                }
                Frame::new(frame.width, frame.height, data)
            }
        }

        let mut comp = LayerCompositor::new(4, 4);
        let id = image_layer(&mut comp, Frame::solid(4, 4, RED), LayerOpts::default());
        comp.set_layer_filter(id, Box::new(Invert));
        let out = comp.composite(0.0);
        assert_eq!(out.pixel(2, 2), [0, 255, 255, 255]);
    }

    #[test]
    fn derived_layer_reuses_target_resolution() {
        let mut comp = LayerCompositor::new(16, 8);
        let base = image_layer(&mut comp, Frame::solid(8, 8, RED), LayerOpts {
            width: Some(8),
            height: Some(8),
            ..LayerOpts::default()
        });
        comp.add_layer(LayerContent::Derived(base), LayerOpts {
            x: 8,
            width: Some(8),
            height: Some(8),
            ..LayerOpts::default()
        });

        let out = comp.composite(0.0);
        assert_eq!(out.pixel(4, 4), RED);
        assert_eq!(out.pixel(12, 4), RED);
    }

    #[test]
    fn derived_cycles_and_remote_placeholders_are_skipped() {
        let mut comp = LayerCompositor::new(4, 4);
        comp.set_background([1, 2, 3, 255]);
        let a = comp.add_layer(LayerContent::Derived(LayerId(999)), LayerOpts::default());
        comp.add_layer(
            LayerContent::Remote {
                url: "https://example.invalid/stream".to_owned(),
            },
            LayerOpts::default(),
        );
        // Point the derived layer at itself.
        comp.layers[0].content = LayerContent::Derived(a);

        let out = comp.composite(0.0);
        assert_eq!(out.pixel(2, 2), [1, 2, 3, 255]);
    }

    #[test]
    fn remove_layer_takes_effect_on_next_composite() {
        let mut comp = LayerCompositor::new(4, 4);
        image_layer(&mut comp, Frame::solid(4, 4, RED), LayerOpts::default());
        let top = image_layer(&mut comp, Frame::solid(4, 4, BLUE), LayerOpts {
            z_index: 1,
            ..LayerOpts::default()
        });
        assert_eq!(comp.composite(0.0).pixel(2, 2), BLUE);
        assert!(comp.remove_layer(top));
        assert!(!comp.remove_layer(top));
        assert_eq!(comp.composite(0.0).pixel(2, 2), RED);
    }

    #[test]
    fn negative_positions_clip_against_canvas_bounds() {
        let mut comp = LayerCompositor::new(4, 4);
        comp.set_background([0, 0, 0, 255]);
        image_layer(&mut comp, Frame::solid(4, 4, BLUE), LayerOpts {
            x: -2,
            y: -2,
            width: Some(4),
            height: Some(4),
            ..LayerOpts::default()
        });
        let out = comp.composite(0.0);
        assert_eq!(out.pixel(0, 0), BLUE);
        assert_eq!(out.pixel(1, 1), BLUE);
        assert_eq!(out.pixel(2, 2), [0, 0, 0, 255]);
    }

    #[test]
    fn parallel_prefetch_matches_sequential_output() {
        let build = |opts: CompositorOpts| {
            let mut comp = LayerCompositor::with_opts(16, 16, opts);
            let anchor: Arc<dyn FrameSource> =
                Arc::new(ProceduralSource::new(|_t| Ok(Frame::solid(1, 1, RED))));
            let src = ProceduralSource::with_dependency(
                |_t| Ok(Frame::solid(16, 16, BLUE)),
                anchor,
            );
            src.start().unwrap();
            comp.add_layer(LayerContent::Source(Arc::new(src)), LayerOpts::default());
            image_layer(&mut comp, Frame::solid(4, 4, RED), LayerOpts {
                z_index: 1,
                x: 6,
                y: 6,
                width: Some(4),
                height: Some(4),
                ..LayerOpts::default()
            });
            comp
        };

        let mut seq = build(CompositorOpts { parallel: false });
        let mut par = build(CompositorOpts { parallel: true });
        assert_eq!(seq.composite(0.0), par.composite(0.0));
    }

    #[test]
    fn composite_rgb_discards_alpha() {
        let mut comp = LayerCompositor::new(2, 2);
        image_layer(
            &mut comp,
            Frame::solid(2, 2, [10, 20, 30, 255]),
            LayerOpts::default(),
        );
        let rgb = comp.composite_rgb(0.0);
        assert_eq!(rgb.dimensions(), (2, 2));
        assert_eq!(rgb.get_pixel(0, 0).0, [10, 20, 30]);
    }
}
