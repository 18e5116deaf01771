//! Line shaping: frequency list for the microwave, raw frame -> bins

use contracts::{linspace, ContractError, FrequencyRange, SampleSequence, ScanMode};

/// Frequency data sent to the microwave source.
///
/// Jump lists repeat every frequency `oversampling_factor` times so the
/// source steps once per hardware sample.
pub fn scan_sequence(
    ranges: &[FrequencyRange],
    mode: ScanMode,
    oversampling_factor: usize,
) -> SampleSequence {
    match mode {
        ScanMode::JumpList => SampleSequence::Explicit(
            ranges
                .iter()
                .flat_map(|r| linspace(r.start, r.stop, r.points))
                .flat_map(|f| std::iter::repeat(f).take(oversampling_factor))
                .collect(),
        ),
        ScanMode::EquidistantSweep => {
            let range = ranges.first().copied().unwrap_or_default();
            SampleSequence::Linear {
                start: range.start,
                stop: range.stop,
                points: range.points,
            }
        }
    }
}

/// Average each block of `factor` consecutive samples into one bin.
///
/// # Errors
/// `Device` if the sample count is not `bins * factor`
pub fn reduce_oversampling(
    device: &str,
    channel: &str,
    samples: &[f64],
    bins: usize,
    factor: usize,
) -> Result<Vec<f64>, ContractError> {
    let factor = factor.max(1);
    if samples.len() != bins * factor {
        return Err(ContractError::device(
            device,
            format!(
                "channel {channel} returned {} samples, expected {}",
                samples.len(),
                bins * factor
            ),
        ));
    }
    if factor == 1 {
        return Ok(samples.to_vec());
    }
    Ok(samples
        .chunks_exact(factor)
        .map(|block| block.iter().sum::<f64>() / factor as f64)
        .collect())
}

/// Split a full line into one slice per range
pub fn split_ranges<'a>(
    line: &'a [f64],
    ranges: &'a [FrequencyRange],
) -> impl Iterator<Item = &'a [f64]> + 'a {
    let mut offset = 0;
    ranges.iter().map(move |r| {
        let end = (offset + r.points).min(line.len());
        let start = offset.min(end);
        offset += r.points;
        &line[start..end]
    })
}
