// Host kernel routines — the sequential side of every primitive
//
// These run over validated, contiguous flat buffers; all shape checking
// happens once in `tensor.rs` before either the host or the device strategy
// is entered, so the routines here stay plain loops.

use crate::activation::Activation;
use crate::format::Format;
use crate::tensor::PoolKind;

/// `out[i] = Σ_j weights[j, i] · input[j]`
///
/// The weight buffer is laid out `(input_count, out_count, 1)`, so the weight
/// connecting input `j` to output `i` sits at `j + i·input_count`.
pub(crate) fn dot_product(weights: &[f32], input: &[f32], out: &mut [f32]) {
    let input_count = input.len();
    for (i, slot) in out.iter_mut().enumerate() {
        let row = &weights[i * input_count..(i + 1) * input_count];
        let mut sum = 0.0;
        for (w, v) in row.iter().zip(input.iter()) {
            sum += w * v;
        }
        *slot = sum;
    }
}

/// Valid cross-correlation of `input` against one kernel, writing a single
/// output depth slice of `out_w · out_h` elements.
///
/// The kernel buffer is `(k, k, input_depth)`; the window at output `(x, y)`
/// starts at input `(x·stride, y·stride)` and sums across the full depth.
pub(crate) fn cross_correlation(
    input: &[f32],
    input_format: Format,
    kernel: &[f32],
    kernel_size: usize,
    stride: usize,
    out_slice: &mut [f32],
    out_w: usize,
    out_h: usize,
) {
    let in_w = input_format.width();
    let in_h = input_format.height();
    let k = kernel_size;
    for y in 0..out_h {
        for x in 0..out_w {
            let mut sum = 0.0;
            for dz in 0..input_format.depth() {
                for dy in 0..k {
                    for dx in 0..k {
                        let in_idx = (x * stride + dx) + (y * stride + dy) * in_w + dz * in_w * in_h;
                        let k_idx = dx + dy * k + dz * k * k;
                        sum += input[in_idx] * kernel[k_idx];
                    }
                }
            }
            out_slice[x + y * out_w] = sum;
        }
    }
}

/// Reduce one window with the selected pooling function.
fn reduce_window(
    input: &[f32],
    input_format: Format,
    x0: usize,
    y0: usize,
    z: usize,
    filter: usize,
    kind: PoolKind,
) -> f32 {
    let in_w = input_format.width();
    let slice = z * input_format.slice_count();
    let mut acc = match kind {
        PoolKind::Max => f32::NEG_INFINITY,
        PoolKind::Min => f32::INFINITY,
        PoolKind::Average => 0.0,
    };
    for dy in 0..filter {
        for dx in 0..filter {
            let v = input[slice + (x0 + dx) + (y0 + dy) * in_w];
            match kind {
                PoolKind::Max => acc = acc.max(v),
                PoolKind::Min => acc = acc.min(v),
                PoolKind::Average => acc += v,
            }
        }
    }
    match kind {
        PoolKind::Average => acc / (filter * filter) as f32,
        _ => acc,
    }
}

/// Pool every depth slice of `input` into `out` (`out_w · out_h` per slice,
/// depth preserved).
pub(crate) fn pool(
    input: &[f32],
    input_format: Format,
    filter: usize,
    stride: usize,
    kind: PoolKind,
    out: &mut [f32],
    out_w: usize,
    out_h: usize,
) {
    for z in 0..input_format.depth() {
        for y in 0..out_h {
            for x in 0..out_w {
                let v = reduce_window(input, input_format, x * stride, y * stride, z, filter, kind);
                out[x + y * out_w + z * out_w * out_h] = v;
            }
        }
    }
}

/// Apply an activation function elementwise in place.
pub(crate) fn apply_activation(data: &mut [f32], act: Activation) {
    for v in data.iter_mut() {
        *v = act.apply(*v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_product_reference() {
        // 2 inputs, 3 outputs: out[i] = w[0,i]·in[0] + w[1,i]·in[1]
        let weights = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let input = [10.0, 100.0];
        let mut out = [0.0; 3];
        dot_product(&weights, &input, &mut out);
        assert_eq!(out, [210.0, 430.0, 650.0]);
    }

    #[test]
    fn test_cross_correlation_identity_kernel() {
        // 1×1 kernel with weight 1 copies the input through.
        let f = Format::new(3, 3, 1);
        let input: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let mut out = vec![0.0; 9];
        cross_correlation(&input, f, &[1.0], 1, 1, &mut out, 3, 3);
        assert_eq!(out, input);
    }

    #[test]
    fn test_cross_correlation_sums_depth() {
        // 2×2 input, 2 depth slices, 2×2 all-ones kernel, stride 2:
        // the single output element is the sum over the whole box.
        let f = Format::new(2, 2, 2);
        let input = [1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0];
        let kernel = [1.0; 8];
        let mut out = [0.0];
        cross_correlation(&input, f, &kernel, 2, 2, &mut out, 1, 1);
        assert_eq!(out, [110.0]);
    }

    #[test]
    fn test_pool_modes() {
        let f = Format::new(2, 2, 1);
        let input = [1.0, 5.0, 3.0, 7.0];
        let mut out = [0.0];
        pool(&input, f, 2, 2, PoolKind::Max, &mut out, 1, 1);
        assert_eq!(out, [7.0]);
        pool(&input, f, 2, 2, PoolKind::Min, &mut out, 1, 1);
        assert_eq!(out, [1.0]);
        pool(&input, f, 2, 2, PoolKind::Average, &mut out, 1, 1);
        assert_eq!(out, [4.0]);
    }
}
