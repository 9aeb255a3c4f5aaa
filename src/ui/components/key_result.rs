/// What a component did with a key press.
///
/// Views offer keys to their overlays first and only handle the key
/// themselves on `NotHandled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResult<T> {
  /// Consumed, nothing for the parent to do
  Handled,
  /// Consumed, and the parent has to react to this event
  Event(T),
  /// Not consumed
  NotHandled,
}
