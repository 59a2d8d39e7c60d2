//! Consistent hash ring.
//!
//! Each member is placed on a 64-bit circle at `replicas` points
//! (`BLAKE3(i || member)`). A key belongs to the first point clockwise of
//! its own hash. Adding or removing one member only moves the keys that
//! land on that member's points.

/// Consistent hash ring over member strings (peer URLs).
#[derive(Debug, Clone)]
pub struct HashRing {
    replicas: usize,
    members: Vec<String>,
    /// (point, index into `members`), sorted by point then member.
    points: Vec<(u64, usize)>,
}

fn point(data: &[u8]) -> u64 {
    let digest = blake3::hash(data);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(head)
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            members: Vec::new(),
            points: Vec::new(),
        }
    }

    pub fn with_members<I, S>(replicas: usize, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = Self::new(replicas);
        ring.extend(members);
        ring
    }

    /// Add members, ignoring duplicates.
    pub fn extend<I, S>(&mut self, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for member in members {
            let member = member.into();
            if self.members.contains(&member) {
                continue;
            }
            let idx = self.members.len();
            for i in 0..self.replicas {
                self.points
                    .push((point(format!("{i}{member}").as_bytes()), idx));
            }
            self.members.push(member);
        }

        // Ties broken by member name so the ring is independent of insertion order.
        let members = &self.members;
        self.points
            .sort_by(|a, b| a.0.cmp(&b.0).then_with(|| members[a.1].cmp(&members[b.1])));
    }

    /// Member owning `key`, or None for an empty ring.
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = point(key.as_bytes());
        let pos = self.points.partition_point(|(p, _)| *p < hash);
        let (_, idx) = self.points[pos % self.points.len()];
        Some(self.members[idx].as_str())
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
