//! Raw CUDA C source for this backend's forward kernels, compiled with
//! NVRTC at `GpuBackend::new` time — same mechanism as the teacher's
//! `kernels::ELEMENTWISE_KERNELS`, trimmed to the forward-only subset this
//! engine's built-in layers dispatch to (no backward/gradient kernels: this
//! is an inference engine, not a trainer).

pub const FUNCTION_NAMES: &[&str] = &["relu_kernel", "sigmoid_kernel", "add_kernel", "scale_kernel"];

pub const ELEMENTWISE_KERNELS: &str = r#"
extern "C" __global__ void relu_kernel(float* out, const float* in, int n) {
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[i] = in[i] > 0.0f ? in[i] : 0.0f;
    }
}

extern "C" __global__ void sigmoid_kernel(float* out, const float* in, int n) {
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[i] = 1.0f / (1.0f + expf(-in[i]));
    }
}

extern "C" __global__ void add_kernel(float* out, const float* a, const float* b, int n) {
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[i] = a[i] + b[i];
    }
}

extern "C" __global__ void scale_kernel(float* out, const float* in, float scale, int n) {
    int i = blockIdx.x * blockDim.x + threadIdx.x;
    if (i < n) {
        out[i] = in[i] * scale;
    }
}
"#;
