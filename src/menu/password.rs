//! Password generator
//!
//! Samples uniformly from the allowed alphabet with the OS RNG and rejects any
//! sample that misses a required character class. Rejection keeps every
//! accepted password uniformly distributed over the valid ones, which placing
//! one character per class at fixed slots would not.

use rand::rngs::OsRng;
use rand::Rng;

/// Shortest password produced; shorter requests are raised to this
pub const MIN_LENGTH: usize = 4;

/// Length offered when the user accepts the default
pub const DEFAULT_LENGTH: usize = 20;

/// Longest password produced; longer requests are cut to this
pub const MAX_LENGTH: usize = 1024;

const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const SPECIAL: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Character classes a password must contain
fn required_classes(digits: bool, special: bool) -> Vec<&'static str> {
    let mut classes = vec![LOWERCASE, UPPERCASE];
    if digits {
        classes.push(DIGITS);
    }
    if special {
        classes.push(SPECIAL);
    }
    classes
}

/// Generate a password of [`MIN_LENGTH`] to [`MAX_LENGTH`] characters
///
/// The result always holds a lowercase and an uppercase letter, plus a digit
/// and a special character when those classes are enabled.
pub fn gen_passwd(length: usize, digits: bool, special: bool) -> String {
    let length = length.clamp(MIN_LENGTH, MAX_LENGTH);
    let classes = required_classes(digits, special);
    let alphabet: Vec<char> = classes.concat().chars().collect();
    let mut rng = OsRng;

    loop {
        let candidate: String = (0..length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect();
        if classes
            .iter()
            .all(|class| candidate.chars().any(|c| class.contains(c)))
        {
            return candidate;
        }
    }
}

/// Expected number of samples [`gen_passwd`] draws for these settings
///
/// The acceptance probability follows from inclusion-exclusion over the
/// required classes: a sample is rejected when it misses at least one class.
pub fn expected_attempts(length: usize, digits: bool, special: bool) -> f64 {
    let length = length.max(MIN_LENGTH) as i32;
    let sizes: Vec<usize> = required_classes(digits, special)
        .iter()
        .map(|c| c.chars().count())
        .collect();
    let total: usize = sizes.iter().sum();

    let mut acceptance = 0.0;
    for mask in 0u32..(1 << sizes.len()) {
        let missing: usize = sizes
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, size)| size)
            .sum();
        let term = ((total - missing) as f64 / total as f64).powi(length);
        if mask.count_ones() % 2 == 0 {
            acceptance += term;
        } else {
            acceptance -= term;
        }
    }
    1.0 / acceptance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has(password: &str, class: &str) -> bool {
        password.chars().any(|c| class.contains(c))
    }

    #[test]
    fn test_short_letters_only() {
        for _ in 0..1000 {
            let password = gen_passwd(4, false, false);
            assert_eq!(password.chars().count(), 4);
            assert!(has(&password, LOWERCASE));
            assert!(has(&password, UPPERCASE));
            assert!(!has(&password, DIGITS));
            assert!(!has(&password, SPECIAL));
        }
    }

    #[test]
    fn test_all_classes_thousand_trials() {
        for _ in 0..1000 {
            let password = gen_passwd(20, true, true);
            assert_eq!(password.chars().count(), 20);
            assert!(has(&password, LOWERCASE));
            assert!(has(&password, UPPERCASE));
            assert!(has(&password, DIGITS));
            assert!(has(&password, SPECIAL));
        }
    }

    #[test]
    fn test_length_is_clamped() {
        assert_eq!(gen_passwd(0, true, true).chars().count(), MIN_LENGTH);
        assert_eq!(gen_passwd(2, false, false).chars().count(), MIN_LENGTH);
        assert_eq!(
            gen_passwd(usize::MAX, true, true).chars().count(),
            MAX_LENGTH
        );
    }

    #[test]
    fn test_digits_without_special() {
        for _ in 0..200 {
            let password = gen_passwd(8, true, false);
            assert!(has(&password, DIGITS));
            assert!(!has(&password, SPECIAL));
        }
    }

    #[test]
    fn test_expected_attempts_letters_only() {
        // Rejected only when all four letters share a case: 2 * (1/2)^4
        let expected = expected_attempts(4, false, false);
        assert!((expected - 1.0 / 0.875).abs() < 1e-9);
    }

    #[test]
    fn test_expected_attempts_stay_low() {
        // Shortest password with every class: acceptance is about 0.0665 over
        // class sizes 26/26/10/32, so roughly 15.04 draws on average.
        let worst = expected_attempts(4, true, true);
        assert!(worst > 15.0 && worst < 16.0);
        assert!(expected_attempts(20, true, true) < 1.2);
        assert!(expected_attempts(DEFAULT_LENGTH, true, false) < 1.1);
    }

    #[test]
    fn test_expected_attempts_decrease_with_length() {
        let short = expected_attempts(6, true, true);
        let long = expected_attempts(30, true, true);
        assert!(long < short);
        assert!(long >= 1.0);
    }
}
