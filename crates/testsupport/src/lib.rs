pub mod fake_runtime;

pub use fake_runtime::{FakeBuild, FakeContainer, FakeOp, FakeRuntime};
