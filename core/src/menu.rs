use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MenuItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

/// Today's menu, in the layout of `public/menu.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Menu {
    #[serde(rename = "Lunch")]
    pub lunch: Vec<MenuItem>,
    #[serde(rename = "Dinner")]
    pub dinner: Vec<MenuItem>,
    #[serde(rename = "ExtraItems", default)]
    pub extra_items: Vec<MenuItem>,
}

impl Menu {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Used when no menu file is available.
    pub fn fallback() -> Self {
        let dish = |name: &str, desc: &str| MenuItem {
            name: name.to_string(),
            desc: Some(desc.to_string()),
            price: None,
        };
        Self {
            lunch: vec![
                dish("Paneer Power Bowl", "Grilled paneer, brown rice, sauteed greens"),
                dish("Dal Tadka Thali", "Yellow dal, two rotis, salad, curd"),
            ],
            dinner: vec![
                dish("Millet Khichdi", "Foxtail millet, moong dal, ghee tempering"),
                dish("Veg Stir Fry", "Seasonal vegetables, tofu, sesame"),
            ],
            extra_items: vec![
                MenuItem {
                    name: "Buttermilk".to_string(),
                    desc: None,
                    price: Some(30.0),
                },
                MenuItem {
                    name: "Fruit Bowl".to_string(),
                    desc: None,
                    price: Some(60.0),
                },
            ],
        }
    }

    /// Markdown rendering sent as the menu message.
    pub fn to_markdown(&self) -> String {
        let mut msg = String::from("**Today's Menu**\n\n**Lunch**\n");
        for item in &self.lunch {
            msg.push_str(&dish_line(item));
        }
        msg.push_str("\n**Dinner**\n");
        for item in &self.dinner {
            msg.push_str(&dish_line(item));
        }
        msg.push_str("\n**Extra Items**\n");
        for item in &self.extra_items {
            match item.price {
                Some(price) => msg.push_str(&format!("- {}: ₹{}\n", item.name, price)),
                None => msg.push_str(&format!("- {}\n", item.name)),
            }
        }
        msg
    }
}

fn dish_line(item: &MenuItem) -> String {
    match item.desc.as_deref() {
        Some(desc) => format!("- {}: {}\n", item.name, desc),
        None => format!("- {}\n", item.name),
    }
}
