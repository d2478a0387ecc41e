use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::prelude::*;
use burn::tensor::TensorData;

struct RequireGradMapper {
    require_grad: bool,
}

impl<B: Backend> ModuleMapper<B> for RequireGradMapper {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        tensor.set_require_grad(self.require_grad)
    }
}

#[derive(Default)]
struct RequireGradCollector {
    flags: Vec<bool>,
}

impl<B: Backend> ModuleVisitor<B> for RequireGradCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.flags.push(tensor.is_require_grad());
    }
}

#[derive(Default)]
struct SnapshotCollector {
    tensors: Vec<TensorData>,
}

impl<B: Backend> ModuleVisitor<B> for SnapshotCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.tensors.push(tensor.to_data());
    }
}

/// Set whether every float parameter of `module` takes part in the backward pass.
///
/// Only a compute saving: parameters that don't require gradients are skipped by autodiff, and
/// optimizers leave parameters without a gradient untouched. Setting the same flag twice is a
/// no-op.
pub fn set_requires_grad<B: Backend, M: Module<B>>(module: M, require_grad: bool) -> M {
    module.map(&mut RequireGradMapper { require_grad })
}

/// Gradient flag of every float parameter, in visiting order.
pub fn requires_grad_flags<B: Backend, M: Module<B>>(module: &M) -> Vec<bool> {
    let mut collector = RequireGradCollector::default();
    module.visit(&mut collector);
    collector.flags
}

/// Values of every float parameter, in visiting order.
pub fn parameter_snapshot<B: Backend, M: Module<B>>(module: &M) -> Vec<TensorData> {
    let mut collector = SnapshotCollector::default();
    module.visit(&mut collector);
    collector.tensors
}
