use std::collections::HashSet;

use cvep_core::{CodeSequence, ContractError, Marker, SymbolHandle, SymbolId, SymbolRegistry};
use tracing::debug;

#[derive(Debug, Clone)]
struct TrialCode {
    id: SymbolId,
    handle: SymbolHandle,
    code: CodeSequence,
}

/// One validated invocation of the presentation loop.
///
/// Built with [`Trial::plan`], which checks every symbol and every code element
/// against the registry, so a planned trial can be presented without contract
/// failures.
#[derive(Debug, Clone)]
pub struct Trial {
    codes: Vec<TrialCode>,
    frames: u64,
    start: Option<Marker>,
    stop: Option<Marker>,
}

impl Trial {
    /// Validate `codes` (in presentation order) and derive the frame count.
    ///
    /// With a duration the trial lasts `round(duration * frame_rate)` frames;
    /// without one it lasts one period of the first code.
    pub fn plan<A>(
        registry: &SymbolRegistry<A>,
        codes: Vec<(SymbolId, CodeSequence)>,
        duration: Option<f64>,
        frame_rate: f64,
    ) -> Result<Self, ContractError> {
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(ContractError::InvalidFrameRate { hz: frame_rate });
        }

        let mut seen = HashSet::with_capacity(codes.len());
        let mut planned = Vec::with_capacity(codes.len());
        for (id, code) in codes {
            if !seen.insert(id.clone()) {
                return Err(ContractError::DuplicateCode { symbol: id });
            }
            let handle = registry.handle(&id)?;
            if code.is_empty() {
                return Err(ContractError::EmptyCodeSequence);
            }
            registry.check_state(handle, code.max_state())?;
            planned.push(TrialCode { id, handle, code });
        }

        let frames = match duration {
            Some(seconds) => {
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(ContractError::InvalidDuration { seconds });
                }
                (seconds * frame_rate).round() as u64
            }
            None => {
                let first = planned.first().ok_or(ContractError::EmptyCodeBook)?;
                if planned.iter().any(|c| c.code.len() != first.code.len()) {
                    debug!(
                        first = %first.id,
                        frames = first.code.len(),
                        "codes differ in length; trial follows the first"
                    );
                }
                first.code.len() as u64
            }
        };

        Ok(Self {
            codes: planned,
            frames,
            start: None,
            stop: None,
        })
    }

    pub fn with_start_marker(mut self, marker: impl Into<Marker>) -> Self {
        self.start = Some(marker.into());
        self
    }

    pub fn with_stop_marker(mut self, marker: impl Into<Marker>) -> Self {
        self.stop = Some(marker.into());
        self
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn symbols(&self) -> impl Iterator<Item = &SymbolId> {
        self.codes.iter().map(|c| &c.id)
    }

    pub fn start_marker(&self) -> Option<&Marker> {
        self.start.as_ref()
    }

    pub fn stop_marker(&self) -> Option<&Marker> {
        self.stop.as_ref()
    }

    /// Fill `out` with each symbol's state at `frame`, in code order.
    pub fn selections(&self, frame: u64, out: &mut Vec<(SymbolHandle, u8)>) {
        out.clear();
        out.extend(self.codes.iter().map(|c| (c.handle, c.code.state_at(frame))));
    }

    /// Re-check handles and states against `registry`.
    pub(crate) fn check<A>(&self, registry: &SymbolRegistry<A>) -> Result<(), ContractError> {
        for c in &self.codes {
            if registry.handle(&c.id)? != c.handle {
                return Err(ContractError::UnknownSymbol {
                    symbol: c.id.clone(),
                });
            }
            registry.check_state(c.handle, c.code.max_state())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cvep_core::Placement;

    use super::*;

    fn registry() -> SymbolRegistry<()> {
        let mut r = SymbolRegistry::new();
        let p = Placement::new((0.0, 0.0), (10.0, 10.0));
        r.register("A", vec![(), ()], p).unwrap();
        r.register("B", vec![(), ()], p).unwrap();
        r
    }

    fn code(states: &[u8]) -> CodeSequence {
        CodeSequence::new(states.to_vec()).unwrap()
    }

    #[test]
    fn duration_sets_frame_count() {
        let t = Trial::plan(
            &registry(),
            vec![("A".into(), code(&[0, 1])), ("B".into(), code(&[1, 0, 0]))],
            Some(0.1),
            60.0,
        )
        .unwrap();
        assert_eq!(t.frames(), 6);

        let t = Trial::plan(&registry(), vec![("A".into(), code(&[0, 1]))], Some(4.2), 60.0)
            .unwrap();
        assert_eq!(t.frames(), 252);
    }

    #[test]
    fn without_duration_first_code_decides() {
        let t = Trial::plan(
            &registry(),
            vec![("B".into(), code(&[1, 0, 0])), ("A".into(), code(&[0, 1]))],
            None,
            60.0,
        )
        .unwrap();
        assert_eq!(t.frames(), 3);
        assert_eq!(
            t.symbols().map(SymbolId::as_str).collect::<Vec<_>>(),
            vec!["B", "A"]
        );
    }

    #[test]
    fn selections_wrap_per_symbol() {
        let reg = registry();
        let t = Trial::plan(
            &reg,
            vec![("A".into(), code(&[0, 1])), ("B".into(), code(&[1, 0, 0]))],
            Some(0.1),
            60.0,
        )
        .unwrap();
        let a = reg.handle(&"A".into()).unwrap();
        let b = reg.handle(&"B".into()).unwrap();
        let mut out = Vec::new();
        t.selections(4, &mut out);
        assert_eq!(out, vec![(a, 0), (b, 0)]);
        t.selections(3, &mut out);
        assert_eq!(out, vec![(a, 1), (b, 1)]);
    }

    #[test]
    fn contract_violations_are_rejected() {
        let reg = registry();
        let err = |codes: Vec<(SymbolId, CodeSequence)>, d: Option<f64>, hz: f64| {
            Trial::plan(&reg, codes, d, hz).unwrap_err()
        };

        assert!(matches!(
            err(vec![("Z".into(), code(&[0]))], None, 60.0),
            ContractError::UnknownSymbol { .. }
        ));
        assert!(matches!(
            err(vec![("A".into(), code(&[0, 2]))], None, 60.0),
            ContractError::StateOutOfRange { state: 2, states: 2, .. }
        ));
        assert!(matches!(
            err(vec![("A".into(), code(&[0])), ("A".into(), code(&[1]))], None, 60.0),
            ContractError::DuplicateCode { .. }
        ));
        assert!(matches!(err(vec![], None, 60.0), ContractError::EmptyCodeBook));
        assert!(matches!(
            err(vec![("A".into(), code(&[0]))], Some(-1.0), 60.0),
            ContractError::InvalidDuration { .. }
        ));
        assert!(matches!(
            err(vec![("A".into(), code(&[0]))], Some(f64::INFINITY), 60.0),
            ContractError::InvalidDuration { .. }
        ));
        assert!(matches!(
            err(vec![("A".into(), code(&[0]))], None, 0.0),
            ContractError::InvalidFrameRate { .. }
        ));
    }

    #[test]
    fn empty_codebook_with_duration_is_blank_frames() {
        let t = Trial::plan(&registry(), vec![], Some(0.5), 60.0).unwrap();
        assert_eq!(t.frames(), 30);
        let mut out = vec![];
        t.selections(0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn zero_duration_has_no_frames() {
        let t = Trial::plan(&registry(), vec![("A".into(), code(&[1]))], Some(0.0), 60.0).unwrap();
        assert_eq!(t.frames(), 0);
    }
}
