use kessoku::inject;

pub struct Left;
pub struct Right;
pub struct Merged;
pub struct App;

async fn new_left() -> Left {
    Left
}

async fn new_right() -> Right {
    Right
}

async fn new_merged(left: Left, right: Right) -> Merged {
    Merged
}

fn new_app(merged: Merged) -> App {
    App
}

inject!(App, "initialize_app",
    provide(new_left),
    provide(new_right),
    provide(new_merged),
    provide(new_app),
);
