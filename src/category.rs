//! The fixed set of expense categories and the filter used when listing expenses.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// The classification tag of an expense.
///
/// Categories are serialized in lower-case, e.g. `"food"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Groceries, restaurants and takeaways.
    Food,
    /// Public transport, fuel, parking.
    Transport,
    /// Rent, utilities and subscriptions.
    Bills,
    /// Clothes, electronics and other purchases.
    Shopping,
    /// Movies, games, events.
    Entertainment,
    /// Doctor visits, pharmacy, fitness.
    Health,
    /// Courses, books, tuition.
    Education,
    /// Anything that does not fit the other categories.
    Other,
}

impl Category {
    /// Every category in display order.
    pub const ALL: [Category; 8] = [
        Category::Food,
        Category::Transport,
        Category::Bills,
        Category::Shopping,
        Category::Entertainment,
        Category::Health,
        Category::Education,
        Category::Other,
    ];

    /// The wire name of the category, e.g. "food".
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "food",
            Category::Transport => "transport",
            Category::Bills => "bills",
            Category::Shopping => "shopping",
            Category::Entertainment => "entertainment",
            Category::Health => "health",
            Category::Education => "education",
            Category::Other => "other",
        }
    }

    /// A human readable label for the category.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Food => "Food & Dining",
            Category::Transport => "Transportation",
            Category::Bills => "Bills & Utilities",
            Category::Shopping => "Shopping",
            Category::Entertainment => "Entertainment",
            Category::Health => "Health & Fitness",
            Category::Education => "Education",
            Category::Other => "Other",
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    /// Parse a category from its wire name, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();

        Category::ALL
            .into_iter()
            .find(|category| category.as_str() == name)
            .ok_or_else(|| Error::InvalidCategory(s.to_owned()))
    }
}

/// Selects which expenses are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    /// Every expense, regardless of category.
    #[default]
    All,
    /// Only expenses in the given category.
    Only(Category),
}

impl CategoryFilter {
    /// The text that selects every category.
    pub const ALL_SENTINEL: &'static str = "all";

    /// Whether an expense in `category` passes the filter.
    pub fn matches(&self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(wanted) => *wanted == category,
        }
    }
}

impl From<Category> for CategoryFilter {
    fn from(category: Category) -> Self {
        CategoryFilter::Only(category)
    }
}

impl FromStr for CategoryFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case(Self::ALL_SENTINEL) {
            return Ok(CategoryFilter::All);
        }

        s.parse().map(CategoryFilter::Only)
    }
}

#[cfg(test)]
mod category_tests {
    use crate::{
        Error,
        category::{Category, CategoryFilter},
    };

    #[test]
    fn parses_wire_names_ignoring_case() {
        assert_eq!("food".parse::<Category>(), Ok(Category::Food));
        assert_eq!(" Transport ".parse::<Category>(), Ok(Category::Transport));
        assert_eq!("EDUCATION".parse::<Category>(), Ok(Category::Education));
    }

    #[test]
    fn rejects_unknown_category() {
        let result = "groceries".parse::<Category>();

        assert_eq!(result, Err(Error::InvalidCategory("groceries".to_owned())));
    }

    #[test]
    fn every_category_round_trips_through_its_name() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>(), Ok(category));
        }
    }

    #[test]
    fn serializes_in_lower_case() {
        let json = serde_json::to_string(&Category::Entertainment).unwrap();

        assert_eq!(json, "\"entertainment\"");
    }

    #[test]
    fn all_sentinel_bypasses_filtering() {
        let filter: CategoryFilter = "all".parse().unwrap();

        assert_eq!(filter, CategoryFilter::All);
        assert!(Category::ALL.into_iter().all(|c| filter.matches(c)));
    }

    #[test]
    fn category_filter_only_matches_its_category() {
        let filter: CategoryFilter = "health".parse().unwrap();

        assert!(filter.matches(Category::Health));
        assert!(!filter.matches(Category::Food));
    }
}
