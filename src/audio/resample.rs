//! # Resampling
//!
//! Mono sinc resampling to the analysis rate.

use rubato::{
    calculate_cutoff, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

const CHUNK_SIZE: usize = 1024;

pub fn build_resampler(src_rate: u32, dst_rate: u32) -> Result<Option<SincFixedIn<f32>>, String> {
    if src_rate == dst_rate {
        return Ok(None);
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    // Onset analysis doesn't need mastering-grade filters; a shorter sinc keeps long files fast.
    let sinc_len = 128usize;
    let window = WindowFunction::BlackmanHarris2;
    let f_cutoff = calculate_cutoff(sinc_len, window);
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window,
    };
    let r = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1).map_err(|e| e.to_string())?;
    Ok(Some(r))
}

/// Resample a whole mono buffer. Output length is `input.len() * dst / src`, rounded,
/// with the filter delay trimmed so sample 0 still lines up with t = 0.
pub fn resample_mono(input: &[f32], src_rate: u32, dst_rate: u32) -> Result<Vec<f32>, String> {
    let Some(mut resampler) = build_resampler(src_rate, dst_rate)? else {
        return Ok(input.to_vec());
    };
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let expected = (input.len() as f64 * dst_rate as f64 / src_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + CHUNK_SIZE);

    let mut pos = 0usize;
    loop {
        let need = resampler.input_frames_next();
        if input.len() - pos < need {
            break;
        }
        let block = [&input[pos..pos + need]];
        let frames = resampler.process(&block, None).map_err(|e| e.to_string())?;
        out.extend_from_slice(&frames[0]);
        pos += need;
    }

    if pos < input.len() {
        let block = [&input[pos..]];
        let frames = resampler
            .process_partial(Some(&block[..]), None)
            .map_err(|e| e.to_string())?;
        out.extend_from_slice(&frames[0]);
    }

    // Flush the filter tail until the delayed signal is fully out.
    while out.len() < expected + delay {
        let frames = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| e.to_string())?;
        if frames[0].is_empty() {
            break;
        }
        out.extend_from_slice(&frames[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}
