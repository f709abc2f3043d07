//! Built-in content that keeps the service useful without an AI provider.

use rand::seq::SliceRandom;

/// Status lines shown while a generation is running, in rotation order.
pub const LOADING_MESSAGES: [&str; 6] = [
  "Connecting to the FLED-AI...",
  "Crafting a level-appropriate reading passage...",
  "Selecting key Tier 2 vocabulary...",
  "Writing comprehension questions...",
  "Formulating the pedagogical rationale...",
  "Almost there...",
];

/// Fallback topics for the random-topic button.
pub fn seed_topics() -> &'static [&'static str] {
  &[
    "The secret life of city pigeons",
    "How volcanoes shape the land around them",
    "A library that only opens at midnight",
    "The history of street food in Istanbul",
    "Why honeybees dance",
    "A chef who cooks only with leftovers",
    "The first people to cross the Sahara by bicycle",
    "How a forgotten language was rediscovered",
    "Life on a research ship in Antarctica",
    "The science of falling asleep",
  ]
}

pub fn random_seed_topic() -> String {
  let mut rng = rand::thread_rng();
  seed_topics()
    .choose(&mut rng)
    .copied()
    .unwrap_or("How volcanoes shape the land around them")
    .to_string()
}
