//! Cache key derivation.
//!
//! Keys are deliberately coarse: nearby coordinates and similar weather/user
//! contexts share an entry, which keeps the hit rate up without letting a
//! recommendation computed for one kind of user leak to another.

use sha2::{Digest, Sha256};

/// Coarse description of the weather a recommendation was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSignature {
  /// Temperature in degrees Celsius
  pub temperature: f64,
  /// Condition text, e.g. "Light rain"
  pub condition: String,
}

/// Coarse description of the user a recommendation was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSignature {
  pub gender: String,
  pub style: String,
}

/// Everything the app caches, keyed the same way everywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheKey {
  /// Weather lookup; coordinates are rounded to two decimals (~1.1 km)
  Weather { latitude: f64, longitude: f64 },
  /// Computed outfit recommendation for a weather and user context
  Recommendation {
    weather: WeatherSignature,
    user: UserSignature,
  },
  /// Anything else; rendered under its own `custom:` prefix so it can never
  /// shadow a derived key
  Custom(String),
}

impl CacheKey {
  pub fn weather(latitude: f64, longitude: f64) -> Self {
    Self::Weather {
      latitude,
      longitude,
    }
  }

  pub fn recommendation(weather: WeatherSignature, user: UserSignature) -> Self {
    Self::Recommendation { weather, user }
  }

  /// Stable string form, without the store namespace.
  pub fn render(&self) -> String {
    match self {
      Self::Weather {
        latitude,
        longitude,
      } => format!(
        "weather:{}:{}",
        round_coordinate(*latitude),
        round_coordinate(*longitude)
      ),
      Self::Recommendation { weather, user } => {
        let input = format!(
          "{}|{}|{}|{}",
          weather.temperature.round() as i64,
          normalize(&weather.condition),
          normalize(&user.gender),
          normalize(&user.style)
        );

        // SHA256 hash for stable, fixed-length keys
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        format!("recommendation:{}", hex::encode(hasher.finalize()))
      }
      Self::Custom(key) => format!("custom:{}", key),
    }
  }
}

impl From<&str> for CacheKey {
  fn from(key: &str) -> Self {
    Self::Custom(key.to_string())
  }
}

impl From<String> for CacheKey {
  fn from(key: String) -> Self {
    Self::Custom(key)
  }
}

fn round_coordinate(value: f64) -> String {
  // Adding 0.0 folds -0.0 into 0.0 so both sides of the meridian agree
  let rounded = (value * 100.0).round() / 100.0 + 0.0;
  format!("{:.2}", rounded)
}

fn normalize(s: &str) -> String {
  s.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sunny(temperature: f64) -> WeatherSignature {
    WeatherSignature {
      temperature,
      condition: "Sunny".to_string(),
    }
  }

  fn user(gender: &str, style: &str) -> UserSignature {
    UserSignature {
      gender: gender.to_string(),
      style: style.to_string(),
    }
  }

  #[test]
  fn test_nearby_coordinates_share_a_key() {
    let a = CacheKey::weather(37.5665, 126.9780).render();
    let b = CacheKey::weather(37.5669, 126.9781).render();
    assert_eq!(a, "weather:37.57:126.98");
    assert_eq!(a, b);
  }

  #[test]
  fn test_distant_coordinates_differ() {
    let a = CacheKey::weather(37.5665, 126.9780).render();
    let b = CacheKey::weather(37.5865, 126.9780).render();
    assert_ne!(a, b);
  }

  #[test]
  fn test_negative_zero_is_folded() {
    assert_eq!(
      CacheKey::weather(-0.001, 0.001).render(),
      "weather:0.00:0.00"
    );
  }

  #[test]
  fn test_recommendation_key_is_coarse() {
    let a = CacheKey::recommendation(sunny(21.2), user("female", "Casual")).render();
    let b = CacheKey::recommendation(
      WeatherSignature {
        temperature: 20.8,
        condition: " sunny ".to_string(),
      },
      user("Female", "casual"),
    )
    .render();
    assert_eq!(a, b);
    assert!(a.starts_with("recommendation:"));
  }

  #[test]
  fn test_recommendation_key_separates_contexts() {
    let base = CacheKey::recommendation(sunny(21.0), user("female", "casual")).render();
    let other_user = CacheKey::recommendation(sunny(21.0), user("male", "casual")).render();
    let other_style = CacheKey::recommendation(sunny(21.0), user("female", "formal")).render();
    let other_temp = CacheKey::recommendation(sunny(25.0), user("female", "casual")).render();

    assert_ne!(base, other_user);
    assert_ne!(base, other_style);
    assert_ne!(base, other_temp);
  }

  #[test]
  fn test_custom_keys_cannot_shadow_derived_keys() {
    let derived = CacheKey::weather(37.5665, 126.9780).render();
    let custom = CacheKey::from(derived.as_str()).render();

    assert_eq!(custom, "custom:weather:37.57:126.98");
    assert_ne!(custom, derived);
  }
}
