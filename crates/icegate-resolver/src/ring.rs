// Consistent-hash ring
//
// Each peer owns the arc between its virtual points and the next point on
// the ring, so adding or removing a peer only moves the keys adjacent to
// its points.

const VIRTUAL_NODES: usize = 64;

#[derive(Debug, Clone)]
pub struct Ring {
    points: Vec<(u64, usize)>,
    peers: Vec<String>,
}

impl Ring {
    /// Panics if `peers` is empty; callers validate the peer list first.
    pub fn new(peers: Vec<String>) -> Self {
        assert!(!peers.is_empty(), "ring requires at least one peer");

        let mut points = Vec::with_capacity(peers.len() * VIRTUAL_NODES);
        for (idx, peer) in peers.iter().enumerate() {
            for replica in 0..VIRTUAL_NODES {
                points.push((hash_point(&format!("{peer}#{replica}")), idx));
            }
        }
        points.sort_unstable();

        Self { points, peers }
    }

    /// The peer that owns `key`: the first ring point at or after the key's
    /// hash, wrapping around.
    pub fn owner(&self, key: &str) -> &str {
        let h = hash_point(key);
        let idx = self.points.partition_point(|(point, _)| *point < h);
        let (_, peer_idx) = self.points[idx % self.points.len()];
        &self.peers[peer_idx]
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }
}

fn hash_point(s: &str) -> u64 {
    let digest = blake3::hash(s.as_bytes());
    u64::from_le_bytes(digest.as_bytes()[..8].try_into().expect("8-byte slice"))
}
