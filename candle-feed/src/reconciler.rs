//! Authoritative candle Series for the active selection.
//!
//! The Series is replaced wholesale by historical loads and extended or amended in place by live
//! aggregator events. Every input carries the [`Generation`] it was produced for; inputs from an
//! older generation are rejected so a slow history response can never overwrite a newer
//! selection.

use crate::{
    aggregator::CandleEvent,
    model::{Candle, Generation, into_series},
    surface::ChartSurface,
};
use thiserror::Error;

/// Change to forward to the rendering boundary after an accepted input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesUpdate {
    ReplaceAll(Vec<Candle>),
    UpsertLast(Candle),
}

impl SeriesUpdate {
    pub fn render<S>(&self, surface: &mut S)
    where
        S: ChartSurface + ?Sized,
    {
        match self {
            SeriesUpdate::ReplaceAll(candles) => surface.replace_all(candles),
            SeriesUpdate::UpsertLast(candle) => surface.upsert_last(candle),
        }
    }
}

/// Reason an input left the Series untouched.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum Ignored {
    #[error("stale result for generation {generation}, current is {current}")]
    Stale {
        generation: Generation,
        current: Generation,
    },

    #[error("opened bucket {bucket_start} is not after the last bucket {last}")]
    OutOfOrder { bucket_start: i64, last: i64 },

    #[error("updated bucket {bucket_start} does not match the last bucket {last:?}")]
    BucketMismatch {
        bucket_start: i64,
        last: Option<i64>,
    },
}

/// Owns the Series: ascending by `bucket_start`, unique, only the last entry may change.
#[derive(Debug, Default)]
pub struct SeriesReconciler {
    generation: Generation,
    series: Vec<Candle>,
}

impl SeriesReconciler {
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn series(&self) -> &[Candle] {
        &self.series
    }

    /// Start a new generation with an empty Series.
    ///
    /// Everything tagged with an earlier generation is stale from here on.
    pub fn begin_generation(&mut self) -> Generation {
        self.generation = self.generation.next();
        self.series.clear();
        self.generation
    }

    /// Replace the whole Series with historical candles of the current generation.
    pub fn reset(
        &mut self,
        generation: Generation,
        candles: Vec<Candle>,
    ) -> Result<SeriesUpdate, Ignored> {
        self.check_generation(generation)?;

        // History is contractually sorted & unique, normalise anyway so the invariant is local
        self.series = into_series(candles);
        Ok(SeriesUpdate::ReplaceAll(self.series.clone()))
    }

    /// Apply a live candle change of the current generation.
    pub fn on_aggregator_event(
        &mut self,
        generation: Generation,
        event: CandleEvent,
    ) -> Result<SeriesUpdate, Ignored> {
        self.check_generation(generation)?;

        match event {
            CandleEvent::Opened(candle) => match self.series.last() {
                Some(last) if candle.bucket_start <= last.bucket_start => Err(Ignored::OutOfOrder {
                    bucket_start: candle.bucket_start,
                    last: last.bucket_start,
                }),
                _ => {
                    self.series.push(candle);
                    Ok(SeriesUpdate::UpsertLast(candle))
                }
            },
            CandleEvent::Updated(candle) => match self.series.last_mut() {
                Some(last) if last.bucket_start == candle.bucket_start => {
                    *last = candle;
                    Ok(SeriesUpdate::UpsertLast(candle))
                }
                last => Err(Ignored::BucketMismatch {
                    bucket_start: candle.bucket_start,
                    last: last.map(|last| last.bucket_start),
                }),
            },
        }
    }

    fn check_generation(&self, generation: Generation) -> Result<(), Ignored> {
        if generation == self.generation {
            Ok(())
        } else {
            Err(Ignored::Stale {
                generation,
                current: self.generation,
            })
        }
    }
}
