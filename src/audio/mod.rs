pub mod biquad;
pub mod cache;
pub mod convolver;
pub mod decode;
pub mod device;
pub mod filter_chain;
pub mod filters;
pub mod graph;
pub mod output_node;
pub mod param;
pub mod sound_node;
pub mod spatial;

pub use cache::{AssetCache, AssetFetcher, AssetLoader, FileFetcher, HttpFetcher, UrlFetcher};
pub use device::AudioOutput;
pub use filter_chain::{AddCompletion, AddFilter, FilterChain, FilterChainCapable, RemoveFilter};
pub use filters::{ConvolverOptions, FilterCatalog, FilterDescriptor, FilterKind, FilterOptions};
pub use graph::{AudioContext, NodeId};
pub use output_node::OutputNode;
pub use sound_node::{SoundEvent, SoundNode, SoundOptions, SoundState, StartRequest};
