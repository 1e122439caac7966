mod flow;
mod lifecycle;
mod limits;
mod replay;
