/// Collective reductions across mesh partitions.
///
/// Every call is a blocking synchronization point: all partitions must reach
/// it with their local contribution before any of them can continue.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn num_ranks(&self) -> usize;
    fn max_all(&self, local: f64) -> f64;
    fn min_all(&self, local: f64) -> f64;
    fn sum_all(&self, local: f64) -> f64;
}

/// Single-partition communicator; every reduction is the identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn max_all(&self, local: f64) -> f64 {
        local
    }

    fn min_all(&self, local: f64) -> f64 {
        local
    }

    fn sum_all(&self, local: f64) -> f64 {
        local
    }
}
