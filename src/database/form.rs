use std::{collections::HashMap, str::FromStr};

use potion::Error;

use super::error::TypeError;
use crate::constants::{FALSY, TRUTHY};

pub type FormData = Vec<(String, String)>;

/// Query string parameters, keeping every value of repeated keys in order.
#[derive(Debug, Default)]
pub struct Form {
    inner: HashMap<String, Vec<String>>,
}

impl Form {
    pub fn from_data(data: FormData) -> Self {
        let mut inner: HashMap<String, Vec<String>> = HashMap::new();
        data.into_iter()
            .for_each(|(key, value)| inner.entry(key).or_default().push(value));
        Self { inner }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.inner
            .get(key)
            .and_then(|values| values.first())
            .map(|value| value.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.inner.get(key).cloned().unwrap_or_default()
    }

    pub fn get_number<T>(&self, key: &str) -> Result<Option<T>, Error>
    where
        T: FromStr,
    {
        match self.get_str(key) {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_e| TypeError::new(&format!("Invalid number for {key}")).into()),
            None => Ok(None),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, Error> {
        match self.get_str(key) {
            Some(value) if TRUTHY.contains(&value) => Ok(Some(true)),
            Some(value) if FALSY.contains(&value) => Ok(Some(false)),
            Some(_) => Err(TypeError::new(&format!("Invalid boolean for {key}")).into()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> Form {
        Form::from_data(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn repeated_keys_are_kept() {
        let form = form(&[("tags", "breakfast"), ("author", "3"), ("tags", "vegan")]);
        assert_eq!(form.get_all("tags"), vec!["breakfast", "vegan"]);
        assert_eq!(form.get_str("tags"), Some("breakfast"));
        assert!(form.get_all("missing").is_empty());
    }

    #[test]
    fn numbers_and_booleans() {
        let form = form(&[
            ("author", "3"),
            ("is_favorited", "1"),
            ("is_in_shopping_cart", "false"),
        ]);
        assert_eq!(form.get_number::<i32>("author").ok().flatten(), Some(3));
        assert_eq!(form.get_bool("is_favorited").ok().flatten(), Some(true));
        assert_eq!(form.get_bool("is_in_shopping_cart").ok().flatten(), Some(false));
        assert_eq!(form.get_bool("absent").ok().flatten(), None);
    }

    #[test]
    fn malformed_values_are_errors() {
        let form = form(&[("author", "three"), ("is_favorited", "maybe")]);
        assert!(form.get_number::<i32>("author").is_err());
        assert!(form.get_bool("is_favorited").is_err());
    }
}
