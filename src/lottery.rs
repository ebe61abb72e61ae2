// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Weighted user lottery.
//!
//! Pick a random system user for some onerous task. Every win is remembered,
//! and the chance of winning again is the inverse of the user's score, so the
//! same person does not keep drawing the short straw.

use rand::Rng;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, warn};

/// Default score database, relative to working directory.
pub const DEFAULT_DATABASE: &str = ".lottery.txt";

/// Score given to newly discovered users.
pub const STARTING_SCORE: u64 = 1;

/// Lowest uid considered a regular user.
pub const DEFAULT_MIN_UID: u32 = 1000;

/// Table of users and the number of times they won.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Scores {
    users: BTreeMap<String, u64>,
}

impl Scores {
    /// Load scores from database file.
    ///
    /// Missing database means nobody has won yet.
    ///
    /// # Errors
    ///
    /// - Return [`LotteryError::Read`] if database exists but cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        match read_to_string(path.as_ref()) {
            Ok(content) => Ok(content.parse()?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(LotteryError::Read {
                source,
                path: path.as_ref().to_path_buf(),
            }),
        }
    }

    /// Write scores back to database file.
    ///
    /// # Errors
    ///
    /// - Return [`LotteryError::Write`] if database cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write(path.as_ref(), self.to_string()).map_err(|source| LotteryError::Write {
            source,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Score of user, if known.
    pub fn get(&self, user: impl AsRef<str>) -> Option<u64> {
        self.users.get(user.as_ref()).copied()
    }

    /// Add users that do not have a score yet.
    pub fn merge(&mut self, users: impl IntoIterator<Item = impl Into<String>>) {
        for user in users {
            self.users.entry(user.into()).or_insert(STARTING_SCORE);
        }
    }

    /// Draw a winner among every user not excluded, and bump their score.
    ///
    /// Each candidate is weighted by `m / score`, where `m` is the least
    /// common multiple of all candidate scores.
    ///
    /// # Errors
    ///
    /// - Return [`LotteryError::NoCandidates`] if everyone is excluded.
    /// - Return [`LotteryError::ZeroScore`] if a candidate has score zero.
    /// - Return [`LotteryError::Overflow`] if scores are too large to weigh.
    pub fn choose(
        &mut self,
        excludes: &[impl AsRef<str>],
        rng: &mut impl Rng,
    ) -> Result<String> {
        let excludes = excludes.iter().map(AsRef::as_ref).collect::<BTreeSet<_>>();
        let candidates = self
            .users
            .iter()
            .filter(|(user, _)| !excludes.contains(user.as_str()))
            .map(|(user, score)| (user.clone(), *score))
            .collect::<Vec<_>>();

        if candidates.is_empty() {
            return Err(LotteryError::NoCandidates);
        }

        if let Some((user, _)) = candidates.iter().find(|(_, score)| *score == 0) {
            return Err(LotteryError::ZeroScore { user: user.clone() });
        }

        let multiple = candidates
            .iter()
            .try_fold(1u128, |acc, (_, score)| lcm(acc, u128::from(*score)))
            .ok_or(LotteryError::Overflow)?;
        let total = candidates
            .iter()
            .try_fold(0u128, |acc, (_, score)| acc.checked_add(multiple / u128::from(*score)))
            .ok_or(LotteryError::Overflow)?;
        debug!("drawing from population of {total}");

        let mut ticket = rng.random_range(0..total);
        let mut winner = candidates[candidates.len() - 1].0.clone();
        for (user, score) in &candidates {
            let weight = multiple / u128::from(*score);
            if ticket < weight {
                winner = user.clone();
                break;
            }
            ticket -= weight;
        }

        if let Some(score) = self.users.get_mut(&winner) {
            *score = score.checked_add(1).ok_or(LotteryError::Overflow)?;
        }

        Ok(winner)
    }
}

impl FromStr for Scores {
    type Err = std::convert::Infallible;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut users = BTreeMap::new();
        for line in content.lines() {
            let parsed = line
                .split_once(':')
                .and_then(|(user, score)| Some((user, score.trim().parse::<u64>().ok()?)));

            // INVARIANT: Malformed lines are skipped.
            match parsed {
                Some((user, score)) => {
                    users.insert(user.to_string(), score);
                }
                None if line.trim().is_empty() => {}
                None => warn!("skipping malformed score line {line:?}"),
            }
        }

        Ok(Self { users })
    }
}

impl Display for Scores {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for (user, score) in &self.users {
            writeln!(fmt, "{user}:{score}")?;
        }

        Ok(())
    }
}

/// List regular users from passwd database content.
pub fn regular_users(passwd: &str, min_uid: u32) -> Vec<String> {
    passwd
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?;
            let uid = fields.nth(1)?.parse::<u32>().ok()?;
            (uid >= min_uid && !name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: u128, b: u128) -> Option<u128> {
    (a / gcd(a, b)).checked_mul(b)
}

/// Lottery error types.
#[derive(Debug, thiserror::Error)]
pub enum LotteryError {
    /// Score database exists, but cannot be read.
    #[error("failed to read scores from {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Score database cannot be written.
    #[error("failed to write scores to {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Nobody left to draw from.
    #[error("no users to choose from")]
    NoCandidates,

    /// Candidate score of zero would give infinite weight.
    #[error("user {user:?} has a score of zero")]
    ZeroScore { user: String },

    /// Scores are too large to weigh against each other.
    #[error("scores too large to draw from")]
    Overflow,

    /// Never happens.
    #[error(transparent)]
    Infallible(#[from] std::convert::Infallible),
}

/// Friendly result alias :3
pub type Result<T, E = LotteryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};
    use simple_test_case::test_case;

    #[test]
    fn parse_skips_malformed_lines() -> anyhow::Result<()> {
        let scores: Scores = indoc! {"
            alice:3
            bob:oops

            carol:1
        "}
        .parse()?;

        assert_eq!(scores.get("alice"), Some(3));
        assert_eq!(scores.get("bob"), None);
        assert_eq!(scores.to_string(), "alice:3\ncarol:1\n");

        Ok(())
    }

    #[test]
    fn regular_users_filters_by_uid() {
        let passwd = indoc! {"
            root:x:0:0:root:/root:/bin/bash
            nobody:x:65534:65534:nobody:/:/usr/sbin/nologin
            alice:x:1000:1000::/home/alice:/bin/bash
            daemon:x:2:2::/:/usr/sbin/nologin
            bob:x:1001:1001::/home/bob:/bin/zsh
        "};

        assert_eq!(regular_users(passwd, 1000), vec!["nobody", "alice", "bob"]);
    }

    #[test]
    fn merge_keeps_existing_scores() -> anyhow::Result<()> {
        let mut scores: Scores = "alice:5\n".parse()?;
        scores.merge(["alice", "bob"]);
        assert_eq!(scores.get("alice"), Some(5));
        assert_eq!(scores.get("bob"), Some(STARTING_SCORE));
        Ok(())
    }

    #[test]
    fn choose_bumps_winner() -> anyhow::Result<()> {
        let mut scores: Scores = "alice:1\nbob:2\ncarol:4\n".parse()?;
        let mut rng = StdRng::seed_from_u64(7);

        let winner = scores.choose(&["carol"], &mut rng)?;
        assert!(winner == "alice" || winner == "bob");
        let bumped = if winner == "alice" { (2, 2) } else { (1, 3) };
        assert_eq!((scores.get("alice").unwrap(), scores.get("bob").unwrap()), bumped);
        assert_eq!(scores.get("carol"), Some(4));

        Ok(())
    }

    #[test]
    fn choose_favours_low_scores() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(42);
        let mut wins = BTreeMap::<String, usize>::new();
        for _ in 0..3000 {
            let mut scores: Scores = "alice:1\nbob:3\n".parse()?;
            *wins.entry(scores.choose(&[] as &[&str], &mut rng)?).or_default() += 1;
        }

        // Alice holds three of every four tickets.
        let alice = wins.get("alice").copied().unwrap_or_default();
        assert!((2000..2500).contains(&alice), "alice won {alice} times");

        Ok(())
    }

    #[test_case("alice:1\n", &["alice"]; "everyone excluded")]
    #[test_case("", &[]; "nobody at all")]
    #[test]
    fn choose_without_candidates(table: &str, excludes: &[&str]) -> anyhow::Result<()> {
        let mut scores: Scores = table.parse()?;
        let result = scores.choose(excludes, &mut StdRng::seed_from_u64(1));
        assert!(matches!(result, Err(LotteryError::NoCandidates)));
        Ok(())
    }

    #[test]
    fn choose_rejects_zero_score() -> anyhow::Result<()> {
        let mut scores: Scores = "alice:0\n".parse()?;
        let result = scores.choose(&[] as &[&str], &mut StdRng::seed_from_u64(1));
        assert!(matches!(result, Err(LotteryError::ZeroScore { .. })));
        Ok(())
    }

    #[test_case(4, 6, Some(12); "shared factor")]
    #[test_case(3, 5, Some(15); "coprime")]
    #[test_case(1, 9, Some(9); "unit")]
    #[test_case(u128::MAX, 2, None; "too large")]
    #[test]
    fn least_common_multiple(a: u128, b: u128, expect: Option<u128>) {
        pretty_assertions::assert_eq!(lcm(a, b), expect);
    }

    #[test]
    fn choose_with_huge_coprime_scores() -> anyhow::Result<()> {
        let mut scores: Scores = "alice:4294967311\nbob:4294967291\n".parse()?;
        let winner = scores.choose(&[] as &[&str], &mut StdRng::seed_from_u64(3))?;
        assert!(winner == "alice" || winner == "bob");
        Ok(())
    }

    #[test]
    fn choose_reports_overflowing_scores() -> anyhow::Result<()> {
        let table = [
            u64::MAX,
            u64::MAX - 2,
            u64::MAX - 4,
            u64::MAX - 6,
        ]
        .iter()
        .enumerate()
        .map(|(index, score)| format!("user{index}:{score}\n"))
        .collect::<String>();
        let mut scores: Scores = table.parse()?;

        let result = scores.choose(&[] as &[&str], &mut StdRng::seed_from_u64(3));
        assert!(matches!(result, Err(LotteryError::Overflow)));
        Ok(())
    }
}
