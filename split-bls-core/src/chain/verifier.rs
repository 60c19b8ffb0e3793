use common::stage::Stage;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    layout::{BoundaryKind, BoundarySignal, SignalLayout, BOUNDARY_SIGNALS},
    utils::errors::ChainError,
    witness::PublicRecord,
};

/// One checked boundary signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryEntry {
    pub signal: String,
    pub kind: BoundaryKind,
    pub producer: Stage,
    pub consumer: Stage,
    pub len: usize,
    pub producer_offset: usize,
    pub consumer_offset: usize,
}

/// Every boundary signal found equal, persisted as `chain_report.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub boundaries: Vec<BoundaryEntry>,
}

/// Exact pointwise comparison of one boundary signal across two public records.
pub fn verify_boundary(
    boundary: &BoundarySignal,
    producer: &PublicRecord,
    consumer: &PublicRecord,
) -> Result<BoundaryEntry, ChainError> {
    debug_assert_eq!(producer.stage(), boundary.producer);
    debug_assert_eq!(consumer.stage(), boundary.consumer);
    SignalLayout::of(boundary.producer).check_public_len(producer.len())?;
    SignalLayout::of(boundary.consumer).check_public_len(consumer.len())?;

    let producer_span = boundary.producer_span()?;
    let consumer_span = boundary.consumer_span()?;
    let produced = &producer.values()[producer_span.range()];
    let consumed = &consumer.values()[consumer_span.range()];

    if let Some(index) = produced.iter().zip_eq(consumed).position(|(a, b)| a != b) {
        return Err(ChainError::Mismatch {
            signal: boundary.signal.name.to_string(),
            producer: boundary.producer,
            consumer: boundary.consumer,
            index,
            producer_offset: producer_span.start + index,
            consumer_offset: consumer_span.start + index,
            producer_value: produced[index].clone(),
            consumer_value: consumed[index].clone(),
        });
    }

    Ok(BoundaryEntry {
        signal: boundary.signal.name.to_string(),
        kind: boundary.kind,
        producer: boundary.producer,
        consumer: boundary.consumer,
        len: producer_span.len,
        producer_offset: producer_span.start,
        consumer_offset: consumer_span.start,
    })
}

/// Checks every declared boundary signal. `records` is indexed by stage, Stage1 first.
pub fn verify_chain(records: [&PublicRecord; 3]) -> Result<ChainReport, ChainError> {
    let record = |stage: Stage| records[stage.index() as usize - 1];
    let boundaries = BOUNDARY_SIGNALS
        .iter()
        .map(|boundary| {
            verify_boundary(boundary, record(boundary.producer), record(boundary.consumer))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ChainReport { boundaries })
}
