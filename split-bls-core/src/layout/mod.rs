//! Public-signal layout of the three stages.
//!
//! Every stage is declared exactly once as a [`StageInterface`]: its outputs followed by
//! its public inputs, which is the order circom assigns to public signals of
//! `component main {public [...]}`. Offset tables, boundary signals and the chain checks
//! are all derived from these declarations, so no offset is ever computed by hand.
//!
//! Offsets returned by [`SignalLayout::offset`] index the *public record* (the witness
//! without its leading constant 1). Add one, or use [`SignalLayout::witness_offset`], to
//! index the witness itself.

pub mod tensor;

use common::{constants::NUM_LIMBS, stage::Stage};
use serde::{Deserialize, Serialize};

use crate::utils::errors::LayoutError;

pub const G1_SHAPE: [usize; 2] = [2, NUM_LIMBS];
pub const G2_SHAPE: [usize; 3] = [2, 2, NUM_LIMBS];
pub const FP12_SHAPE: [usize; 3] = [6, 2, NUM_LIMBS];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalDecl {
    pub name: &'static str,
    pub shape: &'static [usize],
}

impl SignalDecl {
    pub fn len(&self) -> usize {
        tensor::num_elements(self.shape)
    }
}

pub const PUBKEY: SignalDecl = SignalDecl {
    name: "pubkey",
    shape: &G1_SHAPE,
};
pub const SIGNATURE: SignalDecl = SignalDecl {
    name: "signature",
    shape: &G2_SHAPE,
};
/// Hash-to-field output (u0, u1), the pre-image of `Hm`.
pub const HASH: SignalDecl = SignalDecl {
    name: "hash",
    shape: &G2_SHAPE,
};
pub const HM: SignalDecl = SignalDecl {
    name: "Hm",
    shape: &G2_SHAPE,
};
pub const MILLER_OUT: SignalDecl = SignalDecl {
    name: "miller_out",
    shape: &FP12_SHAPE,
};

#[derive(Debug, Clone, Copy)]
pub struct StageInterface {
    pub stage: Stage,
    pub outputs: &'static [SignalDecl],
    pub inputs: &'static [SignalDecl],
}

static STAGE_INTERFACES: [StageInterface; 3] = [
    StageInterface {
        stage: Stage::One,
        outputs: &[HM],
        inputs: &[PUBKEY, SIGNATURE, HASH],
    },
    StageInterface {
        stage: Stage::Two,
        outputs: &[MILLER_OUT],
        inputs: &[PUBKEY, SIGNATURE, HM],
    },
    StageInterface {
        stage: Stage::Three,
        outputs: &[],
        inputs: &[MILLER_OUT],
    },
];

impl StageInterface {
    pub fn of(stage: Stage) -> &'static StageInterface {
        &STAGE_INTERFACES[stage.index() as usize - 1]
    }

    /// Public signals in circom order: outputs, then inputs.
    pub fn public_signals(&self) -> impl Iterator<Item = &'static SignalDecl> {
        self.outputs.iter().chain(self.inputs.iter())
    }

    pub fn input(&self, name: &str) -> Option<&'static SignalDecl> {
        self.inputs.iter().find(|decl| decl.name == name)
    }
}

/// Location of a signal in a flat record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignalSpan {
    pub start: usize,
    pub len: usize,
}

impl SignalSpan {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end()
    }
}

/// Offset table of one stage's public record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalLayout {
    stage: Stage,
    entries: Vec<(SignalDecl, SignalSpan)>,
    total: usize,
}

impl SignalLayout {
    pub fn of(stage: Stage) -> Self {
        let mut start = 0;
        let entries = StageInterface::of(stage)
            .public_signals()
            .map(|decl| {
                let span = SignalSpan {
                    start,
                    len: decl.len(),
                };
                start += span.len;
                (*decl, span)
            })
            .collect();
        Self {
            stage,
            entries,
            total: start,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Declared length of the public record.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn entries(&self) -> &[(SignalDecl, SignalSpan)] {
        &self.entries
    }

    pub fn decl(&self, name: &str) -> Result<SignalDecl, LayoutError> {
        self.find(name).map(|(decl, _)| *decl)
    }

    /// `(start, len)` of `name` in the public record.
    pub fn offset(&self, name: &str) -> Result<SignalSpan, LayoutError> {
        self.find(name).map(|(_, span)| *span)
    }

    /// `(start, len)` of `name` in the witness, which carries the constant 1 at index 0.
    pub fn witness_offset(&self, name: &str) -> Result<SignalSpan, LayoutError> {
        let span = self.offset(name)?;
        Ok(SignalSpan {
            start: span.start + 1,
            len: span.len,
        })
    }

    /// Compares a measured public-record length with the declared total.
    pub fn check_public_len(&self, measured: usize) -> Result<(), LayoutError> {
        if measured != self.total {
            return Err(LayoutError::LengthMismatch {
                stage: self.stage,
                declared: self.total,
                measured,
            });
        }
        Ok(())
    }

    fn find(&self, name: &str) -> Result<&(SignalDecl, SignalSpan), LayoutError> {
        self.entries
            .iter()
            .find(|(decl, _)| decl.name == name)
            .ok_or_else(|| LayoutError::UnknownSignal {
                stage: self.stage,
                name: name.to_string(),
            })
    }
}

pub fn get_offset(stage: Stage, name: &str) -> Result<SignalSpan, LayoutError> {
    SignalLayout::of(stage).offset(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryKind {
    /// Copied out of the producer's witness.
    Extracted,
    /// Copied from the original request; public in both stages.
    Passthrough,
}

/// A public value shared by two stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundarySignal {
    pub signal: SignalDecl,
    pub producer: Stage,
    pub consumer: Stage,
    pub kind: BoundaryKind,
}

pub static BOUNDARY_SIGNALS: [BoundarySignal; 4] = [
    BoundarySignal {
        signal: HM,
        producer: Stage::One,
        consumer: Stage::Two,
        kind: BoundaryKind::Extracted,
    },
    BoundarySignal {
        signal: PUBKEY,
        producer: Stage::One,
        consumer: Stage::Two,
        kind: BoundaryKind::Passthrough,
    },
    BoundarySignal {
        signal: SIGNATURE,
        producer: Stage::One,
        consumer: Stage::Two,
        kind: BoundaryKind::Passthrough,
    },
    BoundarySignal {
        signal: MILLER_OUT,
        producer: Stage::Two,
        consumer: Stage::Three,
        kind: BoundaryKind::Extracted,
    },
];

impl BoundarySignal {
    /// Boundary signals consumed by `stage`.
    pub fn consumed_by(stage: Stage) -> impl Iterator<Item = &'static BoundarySignal> {
        BOUNDARY_SIGNALS
            .iter()
            .filter(move |boundary| boundary.consumer == stage)
    }

    pub fn producer_span(&self) -> Result<SignalSpan, LayoutError> {
        get_offset(self.producer, self.signal.name)
    }

    pub fn consumer_span(&self) -> Result<SignalSpan, LayoutError> {
        get_offset(self.consumer, self.signal.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_totals() {
        assert_eq!(SignalLayout::of(Stage::One).total(), 98);
        assert_eq!(SignalLayout::of(Stage::Two).total(), 154);
        assert_eq!(SignalLayout::of(Stage::Three).total(), 84);
    }

    #[test]
    fn offset_tables() {
        let expected: [(Stage, &[(&str, usize, usize)]); 3] = [
            (
                Stage::One,
                &[("Hm", 0, 28), ("pubkey", 28, 14), ("signature", 42, 28), ("hash", 70, 28)],
            ),
            (
                Stage::Two,
                &[
                    ("miller_out", 0, 84),
                    ("pubkey", 84, 14),
                    ("signature", 98, 28),
                    ("Hm", 126, 28),
                ],
            ),
            (Stage::Three, &[("miller_out", 0, 84)]),
        ];
        for (stage, table) in expected {
            for &(name, start, len) in table {
                assert_eq!(get_offset(stage, name).unwrap(), SignalSpan { start, len }, "{stage} {name}");
            }
        }
    }

    #[test]
    fn offsets_are_stable_and_in_bounds() {
        for stage in Stage::ALL {
            let layout = SignalLayout::of(stage);
            for (decl, span) in layout.entries() {
                let again = SignalLayout::of(stage).offset(decl.name).unwrap();
                assert_eq!(*span, again);
                assert!(span.end() <= layout.total());
                assert_eq!(span.len, decl.shape.iter().product::<usize>());
                assert_eq!(layout.witness_offset(decl.name).unwrap().start, span.start + 1);
            }
        }
    }

    #[test]
    fn length_check() {
        let layout = SignalLayout::of(Stage::One);
        assert!(layout.check_public_len(98).is_ok());
        assert_eq!(
            layout.check_public_len(97),
            Err(LayoutError::LengthMismatch {
                stage: Stage::One,
                declared: 98,
                measured: 97
            })
        );
    }

    #[test]
    fn unknown_signal() {
        assert!(matches!(
            get_offset(Stage::Three, "Hm"),
            Err(LayoutError::UnknownSignal { .. })
        ));
    }

    #[test]
    fn boundary_signals_are_public_on_both_sides() {
        for boundary in BOUNDARY_SIGNALS {
            assert_eq!(boundary.producer.next(), Some(boundary.consumer));
            let producer = boundary.producer_span().unwrap();
            let consumer = boundary.consumer_span().unwrap();
            assert_eq!(producer.len, consumer.len);
            assert!(StageInterface::of(boundary.consumer)
                .input(boundary.signal.name)
                .is_some());
        }
        assert_eq!(BoundarySignal::consumed_by(Stage::Two).count(), 3);
        assert_eq!(BoundarySignal::consumed_by(Stage::Three).count(), 1);
        assert_eq!(BoundarySignal::consumed_by(Stage::One).count(), 0);
    }
}
