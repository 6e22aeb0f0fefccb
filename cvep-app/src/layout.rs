use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cvep_core::{CodeSequence, Placement, SymbolId};
use cvep_render::assets::{generate_state, load_state_image};
use cvep_render::{Display, LabelFont, StateStyle, StimulusRenderer};
use cvep_timing::Timer;
use serde::{Deserialize, Serialize};
use tiny_skia::Pixmap;
use tracing::{debug, info};

/// One key of the speller as laid out on screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub name: String,
    /// Centre relative to the screen centre, y up, in pixels.
    pub position: (f32, f32),
    pub size: (f32, f32),
    /// State images, state 0 first. Without images black/white/green keys are generated.
    #[serde(default)]
    pub images: Vec<PathBuf>,
    /// Text on generated keys; defaults to the name.
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub symbols: Vec<SymbolSpec>,
    base: PathBuf,
}

impl Layout {
    pub fn new(symbols: Vec<SymbolSpec>) -> Self {
        Self {
            symbols,
            base: PathBuf::new(),
        }
    }

    /// Read a JSON list of symbols. Image paths are relative to the file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading layout {}", path.display()))?;
        let symbols: Vec<SymbolSpec> = serde_json::from_str(&text)
            .with_context(|| format!("parsing layout {}", path.display()))?;
        Ok(Self {
            symbols,
            base: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        })
    }

    /// Register every symbol with the renderer, in layout order.
    pub fn register<D: Display, T: Timer<Timestamp = u64>>(
        &self,
        renderer: &mut StimulusRenderer<D, T>,
        font: Option<&LabelFont>,
    ) -> Result<Vec<SymbolId>> {
        let mut ids = Vec::with_capacity(self.symbols.len());
        for spec in &self.symbols {
            let states = self
                .states(spec, font)
                .with_context(|| format!("building states of '{}'", spec.name))?;
            debug!(symbol = %spec.name, states = states.len(), "registering symbol");
            let id = SymbolId::new(&spec.name);
            renderer.add_symbol(&id, states, Placement::new(spec.position, spec.size))?;
            ids.push(id);
        }
        info!(symbols = ids.len(), "layout registered");
        Ok(ids)
    }

    fn states(&self, spec: &SymbolSpec, font: Option<&LabelFont>) -> Result<Vec<Pixmap>> {
        if !spec.images.is_empty() {
            return spec
                .images
                .iter()
                .map(|p| Ok(load_state_image(self.base.join(p))?))
                .collect();
        }
        let size = (
            spec.size.0.round().max(1.0) as u32,
            spec.size.1.round().max(1.0) as u32,
        );
        let label = spec.label.as_deref().unwrap_or(&spec.name);
        StateStyle::speller_keys()
            .into_iter()
            .map(|style| Ok(generate_state(size, style, font.map(|f| (label, f)))?))
            .collect()
    }
}

/// Code sequences at the presentation bit rate, row `i` for the `i`-th symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebook {
    pub codes: Vec<CodeSequence>,
}

impl Codebook {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading codebook {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing codebook {}", path.display()))
    }

    /// Pair each symbol with its code, upsampled to the display rate.
    pub fn assign(&self, symbols: &[SymbolId], upsample: usize) -> Result<Vec<(SymbolId, CodeSequence)>> {
        if self.codes.len() < symbols.len() {
            bail!(
                "codebook has {} codes for {} symbols",
                self.codes.len(),
                symbols.len()
            );
        }
        Ok(symbols
            .iter()
            .zip(&self.codes)
            .map(|(id, code)| (id.clone(), code.upsample(upsample)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use cvep_render::HeadlessDisplay;
    use cvep_timing::ManualTimer;

    use super::*;

    #[test]
    fn layout_json_parses_with_optional_fields() {
        let symbols: Vec<SymbolSpec> = serde_json::from_str(
            r#"[{"name": "A", "position": [-60.0, 40.0], "size": [50.0, 50.0]},
                {"name": "colon", "position": [0.0, 40.0], "size": [50.0, 50.0], "label": ":"}]"#,
        )
        .unwrap();
        assert_eq!(symbols[0].label, None);
        assert!(symbols[0].images.is_empty());
        assert_eq!(symbols[1].label.as_deref(), Some(":"));
    }

    #[test]
    fn generated_keys_are_registered_in_order() {
        let layout = Layout::new(vec![
            SymbolSpec {
                name: "A".into(),
                position: (-20.0, 0.0),
                size: (16.0, 16.0),
                images: vec![],
                label: None,
            },
            SymbolSpec {
                name: "B".into(),
                position: (20.0, 0.0),
                size: (16.0, 16.0),
                images: vec![],
                label: None,
            },
        ]);
        let mut r =
            StimulusRenderer::with_timer(HeadlessDisplay::new(80, 40), ManualTimer::new()).unwrap();
        let ids = layout.register(&mut r, None).unwrap();
        assert_eq!(ids, vec![SymbolId::new("A"), SymbolId::new("B")]);
        assert_eq!(r.registry().get(&ids[1]).unwrap().state_count(), 3);
    }

    #[test]
    fn missing_image_is_an_error() {
        let layout = Layout::new(vec![SymbolSpec {
            name: "A".into(),
            position: (0.0, 0.0),
            size: (16.0, 16.0),
            images: vec![PathBuf::from("/nonexistent/A_black.png")],
            label: None,
        }]);
        let mut r =
            StimulusRenderer::with_timer(HeadlessDisplay::new(40, 40), ManualTimer::new()).unwrap();
        assert!(layout.register(&mut r, None).is_err());
        assert!(r.registry().is_empty());
    }

    #[test]
    fn codebook_is_upsampled_and_must_cover_every_symbol() {
        let book: Codebook = serde_json::from_str(r#"{"codes": [[0, 1], [1, 1, 0]]}"#).unwrap();
        let ids = [SymbolId::new("A"), SymbolId::new("B")];
        let codes = book.assign(&ids, 2).unwrap();
        assert_eq!(codes[0].1.as_slice(), &[0, 0, 1, 1]);
        assert_eq!(codes[1].1.len(), 6);

        let three = [SymbolId::new("A"), SymbolId::new("B"), SymbolId::new("C")];
        assert!(book.assign(&three, 1).is_err());
    }

    #[test]
    fn empty_code_rows_are_rejected() {
        assert!(serde_json::from_str::<Codebook>(r#"{"codes": [[]]}"#).is_err());
    }
}
