//! Calibration constants for capacity defaults and the cost model.
//!
//! Bandwidths are GB/s. They are calibration data: callers may override the
//! kernel table through `PlannerConfig::kernel_bandwidths`.

use crate::sharding::EmbeddingComputeKernel;
use crate::topology::ComputeDevice;

pub const HBM_CAP_DEFAULT: u64 = 32 * 1024 * 1024 * 1024; // 32 GiB
pub const DDR_CAP_DEFAULT: u64 = 2 * 1024 * 1024 * 1024 * 1024; // 2 TiB

pub const INTRA_NODE_BANDWIDTH: f64 = 600.0;
pub const CROSS_NODE_BANDWIDTH: f64 = 12.0;

pub const DEFAULT_CW_DIM: u64 = 32;
pub const DEFAULT_POOLING_FACTOR: f64 = 1.0;
pub const DEFAULT_BATCH_SIZE: u64 = 512;
pub const DEFAULT_MAX_PROPOSALS: usize = 256;

/// Width of a sparse id on the wire.
pub const BIGINT_DTYPE: f64 = 8.0;
/// Width of a pooled / sequence output element (fp32 activations).
pub const OUTPUT_DTYPE: f64 = 4.0;
/// Width of one optimizer-state element (fp32 momentum).
pub const OPTIMIZER_DTYPE: u64 = 4;
/// Per-row scale + bias stored next to quantized rows.
pub const QUANT_ROW_OVERHEAD: u64 = 4;

pub const BWD_COMPUTE_MULTIPLIER: f64 = 2.0;

pub const DDR_MEM_BW: f64 = 51.0;
pub const HBM_MEM_BW: f64 = 897.0;
pub const CACHING_FACTOR: f64 = 0.2;

/// Default lookup bandwidth for a kernel on a device kind.
///
/// `caching_ratio` only matters for `BatchedFusedUvmCaching`, whose effective
/// bandwidth blends HBM hits and DDR misses. `None` means the kernel cannot
/// run on that device.
pub fn kernel_lookup_bw(
    device: ComputeDevice,
    kernel: EmbeddingComputeKernel,
    caching_ratio: f64,
) -> Option<f64> {
    use EmbeddingComputeKernel::*;
    match device {
        ComputeDevice::Cpu => match kernel {
            Dense => Some(1.0 * DDR_MEM_BW),
            Sparse => Some(1.1 * DDR_MEM_BW),
            BatchedDense => Some(1.2 * DDR_MEM_BW),
            BatchedFused => Some(1.3 * DDR_MEM_BW),
            Quant => Some(1.3 * DDR_MEM_BW),
            BatchedFusedUvm | BatchedFusedUvmCaching => None,
        },
        ComputeDevice::Cuda | ComputeDevice::Mtia => match kernel {
            Dense => Some(1.1 * HBM_MEM_BW),
            Sparse => Some(1.2 * HBM_MEM_BW),
            BatchedDense => Some(1.3 * HBM_MEM_BW),
            BatchedFused => Some(1.5 * HBM_MEM_BW),
            BatchedFusedUvm => Some(1.5 * DDR_MEM_BW),
            BatchedFusedUvmCaching => {
                let c = caching_ratio.clamp(0.0, 1.0);
                Some(1.5 * (c * HBM_MEM_BW + (1.0 - c) * DDR_MEM_BW))
            }
            Quant => Some(1.8 * HBM_MEM_BW),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fused_is_faster_than_dense_on_cuda() {
        let dense = kernel_lookup_bw(ComputeDevice::Cuda, EmbeddingComputeKernel::Dense, 0.0);
        let fused = kernel_lookup_bw(ComputeDevice::Cuda, EmbeddingComputeKernel::BatchedFused, 0.0);
        assert!(fused.unwrap() > dense.unwrap());
    }

    #[test]
    fn test_caching_blends_between_uvm_and_hbm() {
        let uvm = kernel_lookup_bw(ComputeDevice::Cuda, EmbeddingComputeKernel::BatchedFusedUvm, 0.0)
            .unwrap();
        let cached = kernel_lookup_bw(
            ComputeDevice::Cuda,
            EmbeddingComputeKernel::BatchedFusedUvmCaching,
            CACHING_FACTOR,
        )
        .unwrap();
        let full = kernel_lookup_bw(ComputeDevice::Cuda, EmbeddingComputeKernel::BatchedFused, 0.0)
            .unwrap();
        assert!(uvm < cached && cached < full);
    }

    #[test]
    fn test_uvm_unavailable_on_cpu() {
        assert!(kernel_lookup_bw(ComputeDevice::Cpu, EmbeddingComputeKernel::BatchedFusedUvm, 0.2)
            .is_none());
    }
}
