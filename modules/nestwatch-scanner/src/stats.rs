use serde::{Deserialize, Serialize};

/// Counters for one scan cycle.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CycleStats {
    pub profiles: u32,
    pub pairs_scanned: u32,
    pub pairs_failed: u32,
    pub pairs_suspended: u32,
    pub listings_fetched: u32,
    pub duplicates: u32,
    pub parse_skips: u32,
    pub matches: u32,
    pub rejections: u32,
    pub notifications_sent: u32,
    pub notifications_failed: u32,
    pub timed_out: bool,
}

impl CycleStats {
    /// Fold a concurrently-produced partial into this one.
    pub fn absorb(&mut self, other: CycleStats) {
        self.profiles += other.profiles;
        self.pairs_scanned += other.pairs_scanned;
        self.pairs_failed += other.pairs_failed;
        self.pairs_suspended += other.pairs_suspended;
        self.listings_fetched += other.listings_fetched;
        self.duplicates += other.duplicates;
        self.parse_skips += other.parse_skips;
        self.matches += other.matches;
        self.rejections += other.rejections;
        self.notifications_sent += other.notifications_sent;
        self.notifications_failed += other.notifications_failed;
        self.timed_out |= other.timed_out;
    }
}

impl std::fmt::Display for CycleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Scan Cycle Complete ===")?;
        writeln!(f, "Profiles:             {}", self.profiles)?;
        writeln!(f, "Pairs scanned:        {}", self.pairs_scanned)?;
        writeln!(f, "Pairs failed:         {}", self.pairs_failed)?;
        writeln!(f, "Pairs suspended:      {}", self.pairs_suspended)?;
        writeln!(f, "Listings fetched:     {}", self.listings_fetched)?;
        writeln!(f, "Duplicates:           {}", self.duplicates)?;
        writeln!(f, "Parse skips:          {}", self.parse_skips)?;
        writeln!(f, "Matches:              {}", self.matches)?;
        writeln!(f, "Rejections:           {}", self.rejections)?;
        writeln!(f, "Notifications sent:   {}", self.notifications_sent)?;
        writeln!(f, "Notifications failed: {}", self.notifications_failed)?;
        if self.timed_out {
            writeln!(f, "Cycle hit its timeout; unfinished pairs retry next cycle")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_sums_counters() {
        let mut a = CycleStats {
            matches: 2,
            duplicates: 1,
            ..Default::default()
        };
        let b = CycleStats {
            matches: 3,
            notifications_sent: 4,
            timed_out: true,
            ..Default::default()
        };
        a.absorb(b);
        assert_eq!(a.matches, 5);
        assert_eq!(a.duplicates, 1);
        assert_eq!(a.notifications_sent, 4);
        assert!(a.timed_out);
    }
}
