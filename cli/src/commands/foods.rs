use anyhow::Result;
use std::process;

use foodlog_core::models::{UserId, UserProfile};
use foodlog_core::service::FoodLogService;

use super::helpers::print_food_table;

pub(crate) fn cmd_foods(
    service: &FoodLogService,
    user_id: UserId,
    mine: bool,
    json: bool,
) -> Result<()> {
    let foods = if mine {
        service.owned_foods(user_id)?
    } else {
        service.visible_foods(user_id)?
    };

    if foods.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No foods found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&foods)?);
    } else {
        print_food_table(&foods);
    }

    Ok(())
}

pub(crate) fn cmd_goal(service: &FoodLogService, user_id: UserId, kcal: f64, json: bool) -> Result<()> {
    service.register_user(user_id, &UserProfile::default())?;
    service.set_goal(user_id, kcal)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "user_id": user_id,
                "goal_kcal": kcal,
            }))?
        );
    } else {
        println!("Daily calorie goal for user {user_id} set to {kcal} kcal");
    }

    Ok(())
}
