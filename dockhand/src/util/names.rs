//! Random container names in the `adjective_surname` style.

use rand::Rng;
use rand::seq::IndexedRandom;

const LEFT: &[&str] = &[
    "admiring", "agitated", "amazing", "angry", "awesome", "bold", "brave", "busy",
    "clever", "cool", "dazzling", "eager", "ecstatic", "elated", "epic", "focused",
    "friendly", "gallant", "happy", "hopeful", "jolly", "keen", "kind", "loving",
    "modest", "nifty", "peaceful", "quirky", "serene", "sharp", "stoic", "tender",
    "vibrant", "wizardly", "youthful", "zealous",
];

const RIGHT: &[&str] = &[
    "albattani", "babbage", "bohr", "curie", "darwin", "dijkstra", "einstein", "euler",
    "fermat", "feynman", "galileo", "hamilton", "hopper", "hypatia", "kepler", "knuth",
    "lamarr", "lovelace", "mccarthy", "meitner", "newton", "noether", "pascal", "ritchie",
    "shannon", "thompson", "turing", "wozniak", "yalow",
];

/// Generate a random name.
///
/// A non-zero `retry` appends a digit to lower the chance of a collision.
pub(crate) fn random_name(retry: usize) -> String {
    let mut rng = rand::rng();
    let left = LEFT.choose(&mut rng).copied().unwrap_or("quirky");
    let right = RIGHT.choose(&mut rng).copied().unwrap_or("turing");
    let name = format!("{}_{}", left, right);
    if retry > 0 {
        format!("{}{}", name, rng.random_range(0..10))
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_name_shape() {
        let name = random_name(0);
        let (left, right) = name.split_once('_').unwrap();
        assert!(LEFT.contains(&left));
        assert!(RIGHT.contains(&right));
    }

    #[test]
    fn test_random_name_retry_appends_digit() {
        let name = random_name(1);
        assert!(name.chars().last().unwrap().is_ascii_digit());
    }
}
