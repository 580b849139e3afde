//! Transformer trait for data transformation

/// Transformer trait for normalizing extracted items
///
/// Transformers are pure: the same input always yields the same output, and
/// nothing outside the returned value is touched. A failure applies to the
/// one input it came from.
///
/// # Example
/// ```
/// use pokedex_sync::etl::Transformer;
///
/// struct Lowercase;
///
/// impl Transformer for Lowercase {
///     type Input = String;
///     type Output = String;
///     type Error = String;
///
///     fn transform(&self, input: &String) -> Result<String, String> {
///         if input.trim().is_empty() {
///             return Err("empty name".to_string());
///         }
///         Ok(input.to_lowercase())
///     }
/// }
///
/// let results = Lowercase.transform_many(&["Bulbasaur".to_string(), " ".to_string()]);
/// assert_eq!(results[0], Ok("bulbasaur".to_string()));
/// assert!(results[1].is_err());
/// ```
pub trait Transformer: Send + Sync {
    /// Input item type
    type Input: Send + Sync;

    /// Output item type after transformation
    type Output: Send;

    /// Error for an input that cannot be transformed
    type Error: Send;

    /// Transform a single item
    ///
    /// # Errors
    /// Returns an error if the input fails validation.
    fn transform(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

    /// Transform multiple items, one result per input in input order
    fn transform_many(&self, inputs: &[Self::Input]) -> Vec<Result<Self::Output, Self::Error>> {
        inputs.iter().map(|i| self.transform(i)).collect()
    }
}
