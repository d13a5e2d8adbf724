// CUDA kernel source — compiled to PTX at context creation via NVRTC
//
// Every device primitive lives here as CUDA C in one compilation unit. Each
// kernel assigns exactly one output element per thread; where a primitive
// needs a reduction (dot product, cross-correlation, pooling) the owning
// thread runs the loop itself, so no kernel synchronizes across lanes.
// Buffers are always contiguous; window positions are passed as offsets.

/// Name of the loaded PTX module.
pub const MODULE_NAME: &str = "stoat";

/// Every kernel in [`KERNEL_SOURCE`], registered at load time.
pub const KERNEL_NAMES: &[&str] = &[
    "fill_f32",
    "add_assign_f32",
    "add_depth_f32",
    "dot_product_f32",
    "cross_correlation_f32",
    "pool_f32",
    "sigmoid_f32",
    "relu_f32",
];

/// All kernel source code in one compilation unit.
pub const KERNEL_SOURCE: &str = r#"

extern "C" __global__ void fill_f32(float* out, float val, unsigned int n) {
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx < n) out[idx] = val;
}

extern "C" __global__ void add_assign_f32(float* dst, const float* src, unsigned int n) {
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx < n) dst[idx] += src[idx];
}

// One bias value per depth slice of `slice_len` elements.
extern "C" __global__ void add_depth_f32(float* dst, const float* biases,
                                         unsigned int slice_len, unsigned int n) {
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx < n) dst[idx] += biases[idx / slice_len];
}

// out[i] = sum_j weights[j + i*input_count] * input[in_offset + j]
extern "C" __global__ void dot_product_f32(const float* weights, const float* input,
                                           unsigned int in_offset, float* out,
                                           unsigned int input_count, unsigned int out_count) {
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx >= out_count) return;
    float sum = 0.0f;
    const float* row = weights + (size_t)idx * input_count;
    for (unsigned int j = 0; j < input_count; j++) {
        sum += row[j] * input[in_offset + j];
    }
    out[idx] = sum;
}

// Valid cross-correlation of one kernel against the input, one output depth
// slice per launch. Each thread owns one (x, y) of the out_w*out_h slice.
extern "C" __global__ void cross_correlation_f32(const float* input, unsigned int in_offset,
                                                 const float* kernel, float* out,
                                                 unsigned int out_offset,
                                                 unsigned int in_w, unsigned int in_h,
                                                 unsigned int k, unsigned int stride,
                                                 unsigned int depth,
                                                 unsigned int out_w, unsigned int n) {
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx >= n) return;
    unsigned int x = idx % out_w;
    unsigned int y = idx / out_w;
    float sum = 0.0f;
    for (unsigned int dz = 0; dz < depth; dz++) {
        for (unsigned int dy = 0; dy < k; dy++) {
            for (unsigned int dx = 0; dx < k; dx++) {
                unsigned int in_idx = (x * stride + dx)
                    + (y * stride + dy) * in_w
                    + dz * in_w * in_h;
                sum += input[in_offset + in_idx] * kernel[dx + dy * k + dz * k * k];
            }
        }
    }
    out[out_offset + idx] = sum;
}

// Pooling over every depth slice. mode: 0 = max, 1 = min, 2 = average.
extern "C" __global__ void pool_f32(const float* input, unsigned int in_offset, float* out,
                                    unsigned int in_w, unsigned int in_h,
                                    unsigned int filter, unsigned int stride,
                                    unsigned int out_w, unsigned int out_h,
                                    int mode, unsigned int n) {
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx >= n) return;
    unsigned int z = idx / (out_w * out_h);
    unsigned int rem = idx % (out_w * out_h);
    unsigned int x = (rem % out_w) * stride;
    unsigned int y = (rem / out_w) * stride;
    unsigned int slice = in_offset + z * in_w * in_h;
    float acc = (mode == 0) ? -INFINITY : (mode == 1) ? INFINITY : 0.0f;
    for (unsigned int dy = 0; dy < filter; dy++) {
        for (unsigned int dx = 0; dx < filter; dx++) {
            float v = input[slice + (x + dx) + (y + dy) * in_w];
            if (mode == 0)      acc = fmaxf(acc, v);
            else if (mode == 1) acc = fminf(acc, v);
            else                acc += v;
        }
    }
    if (mode == 2) acc /= (float)(filter * filter);
    out[idx] = acc;
}

extern "C" __global__ void sigmoid_f32(float* data, unsigned int n) {
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx < n) data[idx] = 1.0f / (1.0f + expf(-data[idx]));
}

extern "C" __global__ void relu_f32(float* data, unsigned int n) {
    unsigned int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx < n) data[idx] = fmaxf(0.0f, data[idx]);
}
"#;
