use crate::error::{DatasetError, Result};
use ndarray::{s, Array2, ArrayView2, Axis};

/// Index range [first, last] of the coordinates falling inside [lo, hi]
pub fn find_index_range(coords: &[f64], lo: f64, hi: f64) -> Option<(usize, usize)> {
    let first = coords.iter().position(|&c| c >= lo && c <= hi)?;
    let last = coords.iter().rposition(|&c| c >= lo && c <= hi)?;
    Some((first, last))
}

/// Crop a field on a regular lat/lon grid to the bounding box
/// `limits = [lon_min, lon_max, lat_min, lat_max]`.
pub fn crop_to_limits(
    field: ArrayView2<f32>,
    lat_axis: &[f64],
    lon_axis: &[f64],
    limits: [f64; 4],
) -> Result<Array2<f32>> {
    let [lon_min, lon_max, lat_min, lat_max] = limits;
    let (r0, r1) = find_index_range(lat_axis, lat_min, lat_max).ok_or_else(|| {
        DatasetError::configuration(format!(
            "No native latitude within [{}, {}]",
            lat_min, lat_max
        ))
    })?;
    let (c0, c1) = find_index_range(lon_axis, lon_min, lon_max).ok_or_else(|| {
        DatasetError::configuration(format!(
            "No native longitude within [{}, {}]",
            lon_min, lon_max
        ))
    })?;
    Ok(field.slice(s![r0..=r1, c0..=c1]).to_owned())
}

/// Nearest-neighbour source index for output cell `i` when enlarging.
fn nearest_source(i: usize, len: usize, new_len: usize) -> usize {
    let src = ((i as f64 + 0.5) * len as f64 / new_len as f64).floor() as usize;
    src.min(len - 1)
}

/// Area-weighted mean of the source cells covered by output cell `i`.
fn box_average(line: &[f32], i: usize, new_len: usize) -> f32 {
    let scale = line.len() as f64 / new_len as f64;
    let start = i as f64 * scale;
    let end = start + scale;
    let mut acc = 0.0f64;
    let mut j = start.floor() as usize;
    while (j as f64) < end && j < line.len() {
        let overlap = end.min(j as f64 + 1.0) - start.max(j as f64);
        if overlap > 0.0 {
            acc += line[j] as f64 * overlap;
        }
        j += 1;
    }
    (acc / scale) as f32
}

/// Resize one axis: replicate nearest cells when growing, average covered
/// cells when shrinking.
pub fn resize_axis(field: ArrayView2<f32>, axis: Axis, new_len: usize) -> Array2<f32> {
    let len = field.len_of(axis);
    if len == new_len || len == 0 || new_len == 0 {
        return field.to_owned();
    }
    let mut shape = [field.nrows(), field.ncols()];
    shape[axis.index()] = new_len;
    let mut out = Array2::<f32>::zeros(shape);

    let other = Axis(1 - axis.index());
    for (src_lane, mut dst_lane) in field.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let line: Vec<f32> = src_lane.iter().copied().collect();
        for (i, dst) in dst_lane.iter_mut().enumerate() {
            *dst = if new_len > len {
                line[nearest_source(i, len, new_len)]
            } else {
                box_average(&line, i, new_len)
            };
        }
    }
    debug_assert_eq!(out.len_of(other), field.len_of(other));
    out
}

/// Separable resize to exactly `size = (rows, cols)`.
pub fn resize(field: ArrayView2<f32>, size: (usize, usize)) -> Array2<f32> {
    let rows = resize_axis(field, Axis(0), size.0);
    resize_axis(rows.view(), Axis(1), size.1)
}
