//! Neural network components for volume reconstruction.
//!
//! Hand-written forward and backward passes over `ndarray` arrays shaped
//! `[batch, channels, z, y, x]`: strided (transposed) convolutions, batch
//! normalization, activations, the AdamW optimizer and the losses used for
//! training and scoring.

pub mod gradient;
pub mod layer;
pub mod loss;
pub mod network;
pub mod optimizer;

pub use gradient::ConvGeometry;
pub use layer::{BatchNorm3d, Conv3d, ConvTranspose3d, Layer, ParamSlot, Relu, Tanh};
pub use loss::{l1_loss_with_gradients, mse};
pub use network::{Autoencoder, Sequential, StateDict};
pub use optimizer::AdamW;
