//! State assets: loading from image files, plain colour fills with an optional
//! label, and scaling to a symbol's on-screen size.

use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontVec, Glyph, PxScale, ScaleFont, point};
use tiny_skia::{
    Color, ColorU8, FilterQuality, Pixmap, PixmapPaint, PremultipliedColorU8, Transform,
};

use crate::RenderError;

/// Fill and label colour of one generated state asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateStyle {
    pub fill: [u8; 4],
    pub text: [u8; 4],
}

impl StateStyle {
    pub const BLACK: StateStyle = StateStyle {
        fill: [0, 0, 0, 255],
        text: [128, 128, 128, 255],
    };
    pub const WHITE: StateStyle = StateStyle {
        fill: [255, 255, 255, 255],
        text: [128, 128, 128, 255],
    };
    pub const GREEN: StateStyle = StateStyle {
        fill: [0, 128, 0, 255],
        text: [128, 128, 128, 255],
    };

    /// Off, on and cue states of a speller key.
    pub fn speller_keys() -> Vec<StateStyle> {
        vec![Self::BLACK, Self::WHITE, Self::GREEN]
    }
}

/// Font used to label generated keys.
pub struct LabelFont {
    font: FontVec,
    size_px: f32,
}

impl LabelFont {
    pub fn from_file(path: impl AsRef<Path>, size_px: f32) -> Result<Self, RenderError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| RenderError::FontRead {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|_| RenderError::InvalidFont {
            path: path.to_path_buf(),
        })?;
        Ok(Self { font, size_px })
    }

    pub fn size_px(&self) -> f32 {
        self.size_px
    }

    /// Render `text` on a transparent pixmap. Lines split on `\n` are centred
    /// under each other, one line height (1.25 em) apart.
    pub fn render(&self, text: &str, rgba: [u8; 4]) -> Result<Pixmap, RenderError> {
        let [r, g, b, a] = rgba;
        let color = Color::from_rgba8(r, g, b, a);
        let mut lines = text
            .split('\n')
            .map(|line| render_text_pixmap(line, self.size_px, &self.font, color))
            .collect::<Result<Vec<_>, _>>()?;
        if lines.len() == 1 {
            return Ok(lines.remove(0));
        }

        let line_height = (self.size_px * 1.25).ceil().max(1.0) as u32;
        let width = lines.iter().map(Pixmap::width).max().unwrap_or(1);
        let height = line_height * lines.len() as u32;
        let mut out = new_pixmap(width, height)?;
        for (i, line) in lines.iter().enumerate() {
            let x = (width - line.width()) / 2;
            let y = i as u32 * line_height;
            out.draw_pixmap(
                x as i32,
                y as i32,
                line.as_ref(),
                &PixmapPaint::default(),
                Transform::identity(),
                None,
            );
        }
        Ok(out)
    }
}

fn new_pixmap(width: u32, height: u32) -> Result<Pixmap, RenderError> {
    Pixmap::new(width, height).ok_or(RenderError::InvalidSize { width, height })
}

/// Decode an image file into a premultiplied pixmap.
pub fn load_state_image(path: impl AsRef<Path>) -> Result<Pixmap, RenderError> {
    let path = path.as_ref();
    let image = image::open(path)
        .map_err(|source| RenderError::Image {
            path: PathBuf::from(path),
            source,
        })?
        .into_rgba8();
    let (width, height) = image.dimensions();
    let mut pm = new_pixmap(width, height)?;
    for (dst, px) in pm.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = px.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pm)
}

/// A solid key of `size`, with `label` centred on it when a font is given.
pub fn generate_state(
    size: (u32, u32),
    style: StateStyle,
    label: Option<(&str, &LabelFont)>,
) -> Result<Pixmap, RenderError> {
    let mut pm = new_pixmap(size.0, size.1)?;
    let [r, g, b, a] = style.fill;
    pm.fill(Color::from_rgba8(r, g, b, a));

    if let Some((text, font)) = label.filter(|(text, _)| !text.is_empty()) {
        let [r, g, b, a] = style.text;
        let text_pm =
            render_text_pixmap(text, font.size_px, &font.font, Color::from_rgba8(r, g, b, a))?;
        let x = (size.0 as i32 - text_pm.width() as i32) / 2;
        let y = (size.1 as i32 - text_pm.height() as i32) / 2;
        pm.draw_pixmap(
            x,
            y,
            text_pm.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }
    Ok(pm)
}

/// Resample `pixmap` to exactly `size`. Returns the input untouched when it already fits.
pub fn scale_to(pixmap: Pixmap, size: (u32, u32)) -> Result<Pixmap, RenderError> {
    if (pixmap.width(), pixmap.height()) == size {
        return Ok(pixmap);
    }
    let mut out = new_pixmap(size.0, size.1)?;
    let sx = size.0 as f32 / pixmap.width() as f32;
    let sy = size.1 as f32 / pixmap.height() as f32;
    let paint = PixmapPaint {
        quality: FilterQuality::Bicubic,
        ..PixmapPaint::default()
    };
    out.draw_pixmap(
        0,
        0,
        pixmap.as_ref(),
        &paint,
        Transform::from_scale(sx, sy),
        None,
    );
    Ok(out)
}

pub fn render_text_pixmap<F: Font>(
    text: &str,
    font_size: f32,
    font: &F,
    color: Color,
) -> Result<Pixmap, RenderError> {
    let scale = PxScale::from(font_size);
    let sf = font.as_scaled(scale);

    // 1) Layout with baseline at ascent
    let mut pen_x = 0.0f32;
    let mut glyphs = Vec::<Glyph>::new();
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(prev) = glyphs.last() {
            pen_x += sf.kern(prev.id, id);
        }
        glyphs.push(Glyph {
            id,
            scale,
            position: point(pen_x, sf.ascent()),
        });
        pen_x += sf.h_advance(id);
    }

    // 2) Union pixel bounds from outlined glyphs
    let mut min_x = f32::INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut max_y = f32::NEG_INFINITY;

    for g in &glyphs {
        if let Some(out) = font.outline_glyph(g.clone()) {
            let b = out.px_bounds();
            min_x = min_x.min(b.min.x);
            min_y = min_y.min(b.min.y);
            max_x = max_x.max(b.max.x);
            max_y = max_y.max(b.max.y);
        }
    }

    if min_x == f32::INFINITY {
        return new_pixmap(1, 1);
    }

    let w = (max_x.ceil() - min_x.floor()).max(1.0) as u32;
    let h = (max_y.ceil() - min_y.floor()).max(1.0) as u32;

    // 3) Transparent, premultiplied target
    let mut pm = new_pixmap(w, h)?;
    let stride = pm.width() as usize;
    let dst = pm.pixels_mut();

    let cu = color.to_color_u8();
    let cu = [cu.red(), cu.green(), cu.blue(), cu.alpha()];

    // 4) Rasterize with premultiplied "over" blending
    for g in &glyphs {
        if let Some(out) = font.outline_glyph(g.clone()) {
            let b = out.px_bounds();
            out.draw(|x, y, cov| {
                if cov <= f32::EPSILON {
                    return;
                }
                let ix = (x as f32 + b.min.x - min_x).floor() as i32;
                let iy = (y as f32 + b.min.y - min_y).floor() as i32;
                if ix < 0 || iy < 0 || ix >= w as i32 || iy >= h as i32 {
                    return;
                }
                let i = iy as usize * stride + ix as usize;

                let a_lin = (cov * cu[3] as f32 / 255.0).clamp(0.0, 1.0);
                let sr = (cu[0] as f32 * a_lin) as u8;
                let sg = (cu[1] as f32 * a_lin) as u8;
                let sb = (cu[2] as f32 * a_lin) as u8;
                let sa = (a_lin * 255.0) as u8;

                let bg = dst[i];
                let inv = 1.0 - (sa as f32 / 255.0);
                let r = sr.saturating_add((bg.red() as f32 * inv) as u8);
                let g = sg.saturating_add((bg.green() as f32 * inv) as u8);
                let b = sb.saturating_add((bg.blue() as f32 * inv) as u8);
                let a = sa.saturating_add((bg.alpha() as f32 * inv) as u8);

                // Channels may exceed alpha through rounding; clamp to stay premultiplied.
                if let Some(px) =
                    PremultipliedColorU8::from_rgba(r.min(a), g.min(a), b.min(a), a)
                {
                    dst[i] = px;
                }
            });
        }
    }

    Ok(pm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_state_is_filled() {
        let pm = generate_state((8, 6), StateStyle::WHITE, None).unwrap();
        assert_eq!((pm.width(), pm.height()), (8, 6));
        assert!(pm.data().iter().all(|&c| c == 255));
    }

    #[test]
    fn zero_size_is_rejected() {
        assert!(matches!(
            generate_state((0, 6), StateStyle::BLACK, None),
            Err(RenderError::InvalidSize { width: 0, height: 6 })
        ));
    }

    #[test]
    fn scale_to_resizes_solid_fill() {
        let pm = generate_state((4, 4), StateStyle::GREEN, None).unwrap();
        let scaled = scale_to(pm, (10, 20)).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (10, 20));
        let centre = scaled.pixel(5, 10).unwrap();
        assert!((126..=130).contains(&centre.green()));
        assert!(centre.alpha() >= 254);
    }

    #[test]
    fn missing_image_reports_path() {
        let err = load_state_image("/nonexistent/key_white.png").unwrap_err();
        match err {
            RenderError::Image { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/key_white.png"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
